pub mod codec;
pub mod error;
pub mod protocol;
mod wordlist;

pub use codec::{generate_receiver_code, generate_relay_code, generate_user_code, parse_user_code};
pub use error::{CodecError, ProtocolError};
pub use protocol::{Frame, HandshakeReader, PrefixedStream, Role, SenderMeta, VERSION_LINE};
