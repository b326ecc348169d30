//! The sender's `russh::client::Handler` (spec §4.4 step 6): pins the host
//! key fingerprint the relay handed back in `ok`/`ready`, and accepts
//! receiver-initiated `forwarded-tcpip` channels for reverse forwards.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{Handler, Msg, Session};
use russh::keys::PublicKey;
use russh::Channel;
use tracing::warn;

use crate::client::error::SenderError;
use crate::client::reverse_forward::ReverseForwardRegistry;
use crate::keys::fingerprint;

pub struct SenderHandler {
    pub expected_fp: String,
    pub reverse_forwards: Arc<ReverseForwardRegistry>,
}

#[async_trait]
impl Handler for SenderHandler {
    type Error = SenderError;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let got = fingerprint(server_public_key);
        if got == self.expected_fp {
            Ok(true)
        } else {
            warn!(expected = %self.expected_fp, %got, "host key mismatch");
            Err(SenderError::HostKeyMismatch {
                expected: self.expected_fp.clone(),
                got,
            })
        }
    }

    /// spec §4.3 reverse-forward accept loop, client side: the receiver
    /// opens one `forwarded-tcpip` channel per connection accepted on its
    /// listener; dial the matching local target and bridge.
    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.reverse_forwards
            .handle_incoming(channel, connected_address, connected_port, originator_address, originator_port)
            .await;
        Ok(())
    }
}
