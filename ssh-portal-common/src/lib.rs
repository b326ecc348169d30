pub mod helpers;
mod types;

pub use types::Secret;
