#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error(transparent)]
    Protocol(#[from] ssh_portal_codec::ProtocolError),
    #[error("already-attached")]
    AlreadyAttached,
    #[error("no-invite")]
    NoInvite,
    #[error("not-ready")]
    NotReady,
    #[error("invalid-token")]
    InvalidToken,
    #[error("bad-side")]
    BadSide,
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// The wire `error` code sent to the client (spec §4.1).
    pub fn wire_code(&self) -> &'static str {
        match self {
            RelayError::AlreadyAttached => "already-attached",
            RelayError::NoInvite => "no-invite",
            RelayError::NotReady => "not-ready",
            RelayError::InvalidToken => "invalid-token",
            RelayError::BadSide => "bad-side",
            RelayError::Protocol(_) | RelayError::Io(_) => "malformed-frame",
        }
    }
}
