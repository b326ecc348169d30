pub mod receiver;
pub mod relay;
pub mod sender;
