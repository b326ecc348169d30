#[derive(thiserror::Error, Debug)]
pub enum SenderError {
    #[error(transparent)]
    Codec(#[from] ssh_portal_codec::CodecError),
    #[error(transparent)]
    Protocol(#[from] ssh_portal_codec::ProtocolError),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("SSH: {0}")]
    Ssh(#[from] russh::Error),
    #[error("connecting to relay timed out")]
    ConnectTimeout,
    #[error("relay handshake timed out")]
    HandshakeTimeout,
    #[error("host key mismatch: pinned {expected}, server presented {got}")]
    HostKeyMismatch { expected: String, got: String },
    #[error("SSH authentication was rejected")]
    Authentication,
    #[error("peer is gone (keepalive failed)")]
    PeerGone,
    #[error("invalid forward address: {0}")]
    InvalidAddress(String),
}
