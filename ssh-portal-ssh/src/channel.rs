//! Shared channel-operation payload types used by both the receiver's server
//! overlay and the sender's client overlay (spec §3, §4.3, §4.4).

use russh::Pty;

/// Parsed `pty-req` payload (spec §4.3 Channel handling / `session`).
#[derive(Clone, Debug)]
pub struct PtyRequest {
    pub term: String,
    pub col_width: u32,
    pub row_height: u32,
    pub pix_width: u32,
    pub pix_height: u32,
    pub modes: Vec<(Pty, u32)>,
}
