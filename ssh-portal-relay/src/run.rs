use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::pairing::{handle_connection, RelayState};
use crate::reaper::run_reaper;

/// Binds `addr`, then forever: accept a connection, spawn a task to dispatch
/// it by role. Accept errors log and the loop continues (spec §4.2 Failure
/// policy). `token` cancels the accept loop (spec §5 "process-wide
/// cancellation token"); `serve` then returns once every in-flight
/// connection task (and therefore every splice) has drained.
pub async fn run_relay(addr: std::net::SocketAddr, config: RelayConfig, token: CancellationToken) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, config, token).await
}

/// Same accept loop as [`run_relay`], but over an already-bound listener —
/// lets callers bind `127.0.0.1:0` and discover the actual port before
/// serving, which `run_relay` itself has no reason to expose.
pub async fn serve(listener: TcpListener, config: RelayConfig, token: CancellationToken) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "relay listening");

    let state = RelayState::new(config);
    tokio::spawn(run_reaper(state.clone(), token.clone()));

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("relay stopping accept loop, draining in-flight splices");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        let state = state.clone();
                        connections.spawn(async move {
                            handle_connection(stream, peer_addr, state).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
        }
    }

    while connections.join_next().await.is_some() {}
    info!("relay shut down cleanly");
    Ok(())
}
