#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("wrong or missing version line")]
    BadVersion,
    #[error("connection closed before a complete frame was read")]
    UnexpectedEof,
    #[error("expected a blank line after ok/ready")]
    ExpectedBlankLine,
    #[error("relay returned error: {0}")]
    Relay(String),
}

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("code half must decode to exactly 4 bytes")]
    BadCodeLength,
    #[error("invalid base64: {0}")]
    Base64(#[from] data_encoding::DecodeError),
    #[error("user code must have the form word-word-word-word-ddd-dddd")]
    BadShape,
    #[error("unknown word {0:?} in user code")]
    UnknownWord(String),
    #[error("numeric part {0} exceeds 0xFFFFF")]
    NumericOverflow(u32),
}
