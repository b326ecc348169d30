#[derive(thiserror::Error, Debug)]
pub enum SshPortalError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("SSH: {0}")]
    Ssh(#[from] russh::Error),
    #[error("SSH key: {0}")]
    Key(#[from] russh::keys::Error),
    #[error(transparent)]
    Protocol(#[from] ssh_portal_codec::ProtocolError),
    #[error("host key mismatch: expected {expected}, got {got}")]
    HostKeyMismatch { expected: String, got: String },
    #[error("SSH authentication failed")]
    Authentication,
    #[error("keepalive timed out")]
    KeepaliveTimeout,
    #[error("peer closed the connection")]
    PeerDisconnected,
}
