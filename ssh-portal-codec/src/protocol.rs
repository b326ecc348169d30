//! The line-oriented JSON handshake that precedes the raw SSH byte stream
//! (spec §4.1). Every role speaks the same framing: one ASCII version line,
//! then JSON frames until the relay's `ok`/`ready` line and its terminating
//! blank line, after which the socket is handed to SSH untouched.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::ProtocolError;

pub const VERSION_LINE: &str = "ssh-relay/1.0\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Receiver,
    Sender,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SenderMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keepalive: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
}

/// One JSON line of the handshake, discriminated by `msg`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum Frame {
    Hello {
        role: Role,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver_fp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ttl_seconds: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<SenderMeta>,
    },
    HelloOk {
        code: String,
        rid: String,
        exp: u64,
    },
    Await {
        rid: String,
    },
    Ok {
        fp: String,
        exp: u64,
        alg: String,
    },
    Ready {
        sender_addr: String,
        fp: String,
        exp: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alg: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<SenderMeta>,
    },
    Error {
        error: String,
    },
}

impl Frame {
    pub fn hello_receiver(receiver_fp: String, ttl_seconds: Option<u32>, token: Option<String>) -> Self {
        Frame::Hello {
            role: Role::Receiver,
            receiver_fp: Some(receiver_fp),
            ttl_seconds,
            code: None,
            token,
            sender: None,
        }
    }

    pub fn hello_sender(code: String, token: Option<String>, sender: Option<SenderMeta>) -> Self {
        Frame::Hello {
            role: Role::Sender,
            receiver_fp: None,
            ttl_seconds: None,
            code: Some(code),
            token,
            sender,
        }
    }
}

/// Reads the version line and JSON frames off an async stream, tracking
/// exactly how many bytes of the underlying buffer have not yet been
/// consumed so the residual can be handed to SSH untouched.
pub struct HandshakeReader<S> {
    inner: BufReader<S>,
}

impl<S: AsyncRead + Unpin> HandshakeReader<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    pub async fn read_version_line(&mut self) -> Result<(), ProtocolError> {
        let mut line = String::new();
        let n = self.inner.read_line(&mut line).await?;
        if n == 0 || line != VERSION_LINE {
            return Err(ProtocolError::BadVersion);
        }
        Ok(())
    }

    pub async fn read_frame(&mut self) -> Result<Frame, ProtocolError> {
        let mut line = String::new();
        let n = self.inner.read_line(&mut line).await?;
        if n == 0 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let trimmed = line.trim_end_matches('\n');
        if let Ok(Frame::Error { error }) = serde_json::from_str::<Frame>(trimmed) {
            return Err(ProtocolError::Relay(error));
        }
        Ok(serde_json::from_str(trimmed)?)
    }

    pub async fn read_blank_line(&mut self) -> Result<(), ProtocolError> {
        let mut line = String::new();
        let n = self.inner.read_line(&mut line).await?;
        if n == 0 || line != "\n" {
            return Err(ProtocolError::ExpectedBlankLine);
        }
        Ok(())
    }

    /// Splits self into any bytes already buffered past what's been consumed,
    /// and the raw stream underneath, so the caller can hand SSH an exact
    /// byte-for-byte continuation with nothing dropped or duplicated.
    pub fn into_residual(self) -> (Vec<u8>, S) {
        let residual = self.inner.buffer().to_vec();
        (residual, self.inner.into_inner())
    }
}

pub async fn write_version_line<W: AsyncWrite + Unpin>(w: &mut W) -> Result<(), ProtocolError> {
    w.write_all(VERSION_LINE.as_bytes()).await?;
    Ok(())
}

pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, frame: &Frame) -> Result<(), ProtocolError> {
    let mut s = serde_json::to_string(frame)?;
    s.push('\n');
    w.write_all(s.as_bytes()).await?;
    Ok(())
}

pub async fn write_blank_line<W: AsyncWrite + Unpin>(w: &mut W) -> Result<(), ProtocolError> {
    w.write_all(b"\n").await?;
    Ok(())
}

/// Replays a handful of buffered bytes ahead of an underlying stream so a
/// reader downstream (the SSH handshake) sees a single continuous byte
/// stream even though framing already consumed past the residual boundary.
pub struct PrefixedStream<S> {
    prefix: std::io::Cursor<Vec<u8>>,
    inner: S,
}

impl<S> PrefixedStream<S> {
    pub fn new(prefix: Vec<u8>, inner: S) -> Self {
        Self {
            prefix: std::io::Cursor::new(prefix),
            inner,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PrefixedStream<S> {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if (this.prefix.position() as usize) < this.prefix.get_ref().len() {
            let unfilled = buf.initialize_unfilled();
            let n = std::io::Read::read(&mut this.prefix, unfilled)?;
            buf.advance(n);
            return std::task::Poll::Ready(Ok(()));
        }
        std::pin::Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PrefixedStream<S> {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    fn pair() -> (DuplexStream, DuplexStream) {
        tokio::io::duplex(4096)
    }

    #[tokio::test]
    async fn reads_version_line_then_frame_then_residual() {
        let (mut client, server) = pair();
        client.write_all(VERSION_LINE.as_bytes()).await.unwrap();
        write_frame(
            &mut client,
            &Frame::Hello {
                role: Role::Receiver,
                receiver_fp: Some("SHA256:abc".into()),
                ttl_seconds: None,
                code: None,
                token: None,
                sender: None,
            },
        )
        .await
        .unwrap();
        client.write_all(b"\n").await.unwrap();
        client.write_all(b"SSH-2.0-fake\r\n").await.unwrap();

        let mut reader = HandshakeReader::new(server);
        reader.read_version_line().await.unwrap();
        let frame = reader.read_frame().await.unwrap();
        match frame {
            Frame::Hello { role: Role::Receiver, receiver_fp: Some(fp), .. } => assert_eq!(fp, "SHA256:abc"),
            other => panic!("unexpected frame: {other:?}"),
        }
        reader.read_blank_line().await.unwrap();
        let (residual, mut rest) = reader.into_residual();
        let mut full = residual;
        let mut tail = [0u8; 32];
        let n = rest.read(&mut tail).await.unwrap();
        full.extend_from_slice(&tail[..n]);
        assert_eq!(&full, b"SSH-2.0-fake\r\n");
    }

    #[test]
    fn hello_receiver_and_sender_constructors_set_role() {
        let r = Frame::hello_receiver("SHA256:x".into(), Some(600), None);
        matches!(r, Frame::Hello { role: Role::Receiver, .. });
        let s = Frame::hello_sender("code".into(), None, None);
        matches!(s, Frame::Hello { role: Role::Sender, .. });
    }

    #[test]
    fn rejects_bad_version_line_string() {
        assert_eq!(VERSION_LINE, "ssh-relay/1.0\n");
    }
}
