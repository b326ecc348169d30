//! Bidirectional byte bridging between an SSH channel this process opened
//! itself (a `direct-tcpip` or `forwarded-tcpip` channel, server or client
//! side) and a plain TCP socket. Shared by the receiver's forward handling
//! and the sender's local/reverse forward registries (spec §4.3, §4.4).

use russh::{Channel, ChannelMsg};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Drives one forward's data path until either side closes. `channel` was
/// opened by this process (not delivered via a `Handler` callback), so it
/// owns its own receive loop via `Channel::wait`.
pub async fn bridge_channel_tcp<M: Send + Sync + 'static>(mut channel: Channel<M>, tcp: TcpStream) {
    let (mut tcp_read, mut tcp_write) = tcp.into_split();
    let mut buf = [0u8; 16 * 1024];
    loop {
        tokio::select! {
            result = tcp_read.read(&mut buf) => {
                match result {
                    Ok(0) | Err(_) => {
                        let _ = channel.eof().await;
                        break;
                    }
                    Ok(n) => {
                        if channel.data(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { data }) => {
                        if tcp_write.write_all(&data).await.is_err() {
                            break;
                        }
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                    _ => {}
                }
            }
        }
    }
    let _ = tcp_write.shutdown().await;
}
