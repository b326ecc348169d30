//! The receiver's `russh::server::Handler` (spec §4.3): password auth,
//! `direct-tcpip`, `tcpip-forward`/`cancel-tcpip-forward`, and the `session`
//! channel's pty/shell/exec/window-change requests.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, Pty};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::bridge::bridge_channel_tcp;
use crate::channel::PtyRequest;
use crate::error::SshPortalError;
use crate::server::forward::{CancelHandle, DirectForward};
use crate::server::pty_shell::{discover_shell, discover_term, spawn_exec, spawn_shell_with_pty};
use crate::server::session::{SessionChannelState, SharedState};

pub struct ReceiverHandler {
    state: Arc<SharedState>,
}

impl ReceiverHandler {
    pub fn new(state: Arc<SharedState>) -> Self {
        Self { state }
    }

    async fn spawn_output_forwarder(&self, channel: ChannelId, session: &Session, mut rx: tokio::sync::mpsc::UnboundedReceiver<Bytes>) {
        let handle = session.handle();
        tokio::spawn(async move {
            while let Some(data) = rx.recv().await {
                if handle.data(channel, data.to_vec().into()).await.is_err() {
                    break;
                }
            }
        });
    }

    /// Waits for the channel's spawned process to exit, then reports its
    /// exit status and closes the channel instead of abandoning it (spec
    /// §4.3 `session` channel teardown) — an SSH client otherwise hangs
    /// forever waiting for `exit-status`/close.
    fn spawn_exit_forwarder(&self, channel: ChannelId, session: &Session, exit_rx: tokio::sync::oneshot::Receiver<u32>) {
        let handle = session.handle();
        let state = self.state.clone();
        tokio::spawn(async move {
            let exit_status = exit_rx.await.unwrap_or(1);
            let _ = handle.exit_status_request(channel, exit_status).await;
            let _ = handle.eof(channel).await;
            let _ = handle.close(channel).await;
            state.sessions.lock().await.remove(&channel);
        });
    }
}

#[async_trait]
impl Handler for ReceiverHandler {
    type Error = SshPortalError;

    async fn auth_none(&mut self, _user: &str) -> Result<Auth, Self::Error> {
        Ok(Auth::Reject { proceed_with_methods: None })
    }

    async fn auth_publickey(&mut self, _user: &str, _key: &russh::keys::PublicKey) -> Result<Auth, Self::Error> {
        Ok(Auth::Reject { proceed_with_methods: None })
    }

    /// spec §4.3 step 6: `user == code && password == fullCode`, anything
    /// else is an auth failure logged with the sender's address.
    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if self.state.checks_out(user, password) {
            info!(sender_addr = %self.state.sender_addr, "password auth succeeded");
            Ok(Auth::Accept)
        } else {
            warn!(sender_addr = %self.state.sender_addr, %user, "password auth failed");
            Ok(Auth::Reject { proceed_with_methods: None })
        }
    }

    async fn channel_open_session(&mut self, channel: Channel<Msg>, session: &mut Session) -> Result<bool, Self::Error> {
        self.state.record_handle(session.handle()).await;
        if !self.state.config.session_enabled {
            return Ok(false);
        }
        self.state.sessions.lock().await.insert(
            channel.id(),
            SessionChannelState {
                pty_allocated: false,
                process: None,
            },
        );
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let req = PtyRequest {
            term: term.to_string(),
            col_width,
            row_height,
            pix_width,
            pix_height,
            modes: modes.to_vec(),
        };
        let shell = discover_shell();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        match spawn_shell_with_pty(&shell, &req.term, &req, tx) {
            Ok((process, exit_rx)) => {
                let mut sessions = self.state.sessions.lock().await;
                if let Some(state) = sessions.get_mut(&channel) {
                    state.pty_allocated = true;
                    state.process = Some(process);
                }
                drop(sessions);
                self.spawn_output_forwarder(channel, session, rx).await;
                self.spawn_exit_forwarder(channel, session, exit_rx);
                session.channel_success(channel);
            }
            Err(e) => {
                warn!(error = %e, "failed to allocate pty");
                session.channel_failure(channel);
            }
        }
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), Self::Error> {
        let mut sessions = self.state.sessions.lock().await;
        let already_has_pty = sessions.get(&channel).map(|s| s.pty_allocated).unwrap_or(false);
        if already_has_pty {
            // PTY already spawned the shell in `pty_request`; just ack.
            session.channel_success(channel);
            return Ok(());
        }
        drop(sessions);

        // No PTY: glue a login shell's plain stdio to the channel.
        let shell = discover_shell();
        let term = discover_term();
        let req = PtyRequest {
            term: term.clone(),
            col_width: 80,
            row_height: 24,
            pix_width: 0,
            pix_height: 0,
            modes: Vec::new(),
        };
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        match spawn_shell_with_pty(&shell, &term, &req, tx) {
            Ok((process, exit_rx)) => {
                self.state.sessions.lock().await.insert(
                    channel,
                    SessionChannelState {
                        pty_allocated: false,
                        process: Some(process),
                    },
                );
                self.spawn_output_forwarder(channel, session, rx).await;
                self.spawn_exit_forwarder(channel, session, exit_rx);
                session.channel_success(channel);
            }
            Err(e) => {
                warn!(error = %e, "failed to start shell");
                session.channel_failure(channel);
            }
        }
        Ok(())
    }

    async fn exec_request(&mut self, channel: ChannelId, data: &[u8], session: &mut Session) -> Result<(), Self::Error> {
        let cmd = String::from_utf8_lossy(data).to_string();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        match spawn_exec(&cmd, tx) {
            Ok((process, exit_rx)) => {
                self.state.sessions.lock().await.insert(
                    channel,
                    SessionChannelState {
                        pty_allocated: false,
                        process: Some(process),
                    },
                );
                self.spawn_output_forwarder(channel, session, rx).await;
                self.spawn_exit_forwarder(channel, session, exit_rx);
                session.channel_success(channel);
            }
            Err(e) => {
                warn!(error = %e, "exec failed to spawn");
                session.channel_failure(channel);
            }
        }
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let req = PtyRequest {
            term: String::new(),
            col_width,
            row_height,
            pix_width,
            pix_height,
            modes: Vec::new(),
        };
        if let Some(state) = self.state.sessions.lock().await.get(&channel) {
            if let Some(process) = &state.process {
                process.resize(&req);
            }
        }
        Ok(())
    }

    async fn data(&mut self, channel: ChannelId, data: &[u8], _session: &mut Session) -> Result<(), Self::Error> {
        if let Some(state) = self.state.sessions.lock().await.get(&channel) {
            if let Some(process) = &state.process {
                process.write_stdin(data);
            }
        }
        Ok(())
    }

    async fn channel_eof(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        self.state.sessions.lock().await.remove(&channel);
        self.state.direct_forwards.remove(channel).await;
        Ok(())
    }

    async fn channel_close(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        self.state.sessions.lock().await.remove(&channel);
        self.state.direct_forwards.remove(channel).await;
        Ok(())
    }

    /// spec §4.3 `direct-tcpip`: dial the requested destination, register a
    /// `DirectForward`, and bridge bytes until either side EOFs.
    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.state.record_handle(session.handle()).await;
        let destination = format!("{host_to_connect}:{port_to_connect}");
        let origin = format!("{originator_address}:{originator_port}");
        let sender_addr = self.state.sender_addr;

        let tcp = match TcpStream::connect(&destination).await {
            Ok(tcp) => tcp,
            Err(e) => {
                warn!(%destination, error = %e, "direct-tcpip dial failed");
                return Ok(false);
            }
        };

        let channel_id = channel.id();
        self.state
            .direct_forwards
            .insert(DirectForward {
                channel: channel_id,
                origin,
                destination,
                created_at: std::time::SystemTime::now(),
                sender_addr,
            })
            .await;

        let registry_clone = self.state.clone();
        tokio::spawn(async move {
            bridge_channel_tcp(channel, tcp).await;
            registry_clone.direct_forwards.remove(channel_id).await;
        });
        Ok(true)
    }

    /// spec §4.3 `tcpip-forward`: open a listener, reply with the bound port
    /// when `bindPort==0`, and start an accept loop that opens one
    /// `forwarded-tcpip` channel per accepted connection.
    async fn tcpip_forward(&mut self, address: &str, port: &mut u32, session: &mut Session) -> Result<bool, Self::Error> {
        self.state.record_handle(session.handle()).await;
        let bind_spec = format!("{address}:{port}");
        let listener = match TcpListener::bind(&bind_spec).await {
            Ok(l) => l,
            Err(e) => {
                warn!(%bind_spec, error = %e, "tcpip-forward listen failed");
                return Ok(false);
            }
        };
        let actual_port = listener.local_addr().map(|a| a.port() as u32).unwrap_or(*port);
        if *port == 0 {
            *port = actual_port;
        }

        let (cancel, mut cancel_rx) = CancelHandle::pair();
        self.state.reverse_forwards.insert(address.to_string(), actual_port, cancel).await;

        let handle = session.handle();
        let state = self.state.clone();
        let bind_addr = address.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    accepted = listener.accept() => {
                        let Ok((tcp, origin)) = accepted else { break };
                        state.reverse_forwards.set_last_origin(&bind_addr, actual_port, origin.to_string()).await;
                        let handle = handle.clone();
                        let bind_addr = bind_addr.clone();
                        tokio::spawn(async move {
                            match handle
                                .channel_open_forwarded_tcpip(bind_addr, actual_port, origin.ip().to_string(), origin.port() as u32)
                                .await
                            {
                                Ok(channel) => bridge_channel_tcp(channel, tcp).await,
                                Err(e) => warn!(error = ?e, "forwarded-tcpip open failed"),
                            }
                        });
                    }
                }
            }
        });
        Ok(true)
    }

    async fn cancel_tcpip_forward(&mut self, address: &str, port: u32, _session: &mut Session) -> Result<bool, Self::Error> {
        Ok(self.state.reverse_forwards.cancel(address, port).await)
    }

    async fn global_request(&mut self, name: &str, _data: &[u8], session: &mut Session) -> Result<(), Self::Error> {
        self.state.record_handle(session.handle()).await;
        if name == "keepalive@ssh-portal" {
            self.state.touch_keepalive().await;
            session.request_success();
        } else {
            session.request_failure();
        }
        Ok(())
    }
}
