//! The byte-splice engine: two independent unidirectional copies bridging a
//! paired receiver and sender socket (spec §3, §4.2 "Byte splice").

use std::collections::HashMap;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::SystemTime;

use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::{broadcast, Mutex};

#[derive(Debug, Clone)]
pub enum SpliceEvent {
    NewSplice { id: u64 },
    ClosedSplice { id: u64 },
}

pub struct Splice {
    pub id: u64,
    pub code: String,
    pub rid: String,
    pub receiver_fp: String,
    pub sender_addr: SocketAddr,
    pub receiver_addr: SocketAddr,
    pub created_at: SystemTime,
    pub bytes_up: AtomicU64,
    pub bytes_down: AtomicU64,
    pub closed_at: Mutex<Option<SystemTime>>,
}

pub struct SpliceRegistry {
    splices: Mutex<HashMap<u64, Arc<Splice>>>,
    events: broadcast::Sender<SpliceEvent>,
}

impl Default for SpliceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SpliceRegistry {
    pub fn new() -> Self {
        Self {
            splices: Mutex::new(HashMap::new()),
            events: broadcast::channel(64).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpliceEvent> {
        self.events.subscribe()
    }

    pub async fn register(
        &self,
        code: String,
        rid: String,
        receiver_fp: String,
        sender_addr: SocketAddr,
        receiver_addr: SocketAddr,
    ) -> Arc<Splice> {
        // Monotonic nanosecond timestamp, unique per process (spec §3 Splice.id).
        let id = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let splice = Arc::new(Splice {
            id,
            code,
            rid,
            receiver_fp,
            sender_addr,
            receiver_addr,
            created_at: SystemTime::now(),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
            closed_at: Mutex::new(None),
        });
        self.splices.lock().await.insert(id, splice.clone());
        let _ = self.events.send(SpliceEvent::NewSplice { id });
        splice
    }

    pub async fn close(&self, id: u64) {
        if let Some(splice) = self.splices.lock().await.remove(&id) {
            *splice.closed_at.lock().await = Some(SystemTime::now());
        }
        let _ = self.events.send(SpliceEvent::ClosedSplice { id });
    }

    pub async fn snapshot(&self) -> Vec<Arc<Splice>> {
        self.splices.lock().await.values().cloned().collect()
    }
}

/// Wraps a writer half, atomically accumulating every write directly into
/// the live `Splice` counter it is passed — not a private intermediate —
/// so a snapshot reader sees up-to-date totals throughout the splice, not
/// only after it closes (spec §9 "Splice byte accounting").
struct CountingWriter<'a, W> {
    inner: W,
    counter: &'a AtomicU64,
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CountingWriter<'_, W> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.counter.fetch_add(n as u64, Ordering::Relaxed);
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Bridges `receiver` and `sender` bidirectionally until both directions
/// terminate, then closes the splice record. Neither direction's failure is
/// fatal to the process — only to this splice.
pub async fn run_splice<A, B>(registry: &SpliceRegistry, splice: Arc<Splice>, receiver: A, sender: B)
where
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut recv_read, recv_write) = io::split(receiver);
    let (mut send_read, send_write) = io::split(sender);

    let mut up_writer = CountingWriter {
        inner: send_write,
        counter: &splice.bytes_up,
    };
    let mut down_writer = CountingWriter {
        inner: recv_write,
        counter: &splice.bytes_down,
    };

    let upstream = async {
        let _ = io::copy(&mut recv_read, &mut up_writer).await;
        let _ = up_writer.shutdown().await;
    };
    let downstream = async {
        let _ = io::copy(&mut send_read, &mut down_writer).await;
        let _ = down_writer.shutdown().await;
    };

    tokio::join!(upstream, downstream);
    registry.close(splice.id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;

    #[tokio::test]
    async fn splice_counts_bytes_both_directions_and_closes() {
        let registry = SpliceRegistry::new();
        let (recv_a, recv_b) = tokio::io::duplex(1024);
        let (send_a, send_b) = tokio::io::duplex(1024);

        let splice = registry
            .register(
                "code".into(),
                "rid".into(),
                "SHA256:x".into(),
                "127.0.0.1:1".parse().unwrap(),
                "127.0.0.1:2".parse().unwrap(),
            )
            .await;
        let id = splice.id;

        let mut recv_b_w = recv_b;
        let mut send_b_w = send_b;
        let driver = tokio::spawn(async move {
            recv_b_w.write_all(b"hello-from-receiver").await.unwrap();
            recv_b_w.shutdown().await.unwrap();
            send_b_w.write_all(b"hi-from-sender").await.unwrap();
            send_b_w.shutdown().await.unwrap();
        });

        run_splice(&registry, splice.clone(), recv_a, send_a).await;
        driver.await.unwrap();

        assert_eq!(splice.bytes_up.load(Ordering::Relaxed), "hello-from-receiver".len() as u64);
        assert_eq!(splice.bytes_down.load(Ordering::Relaxed), "hi-from-sender".len() as u64);
        assert!(registry.snapshot().await.iter().all(|s| s.id != id));
    }
}
