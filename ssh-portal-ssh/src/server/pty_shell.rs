//! Backs the receiver's `session` channel: `pty-req`/`shell`/`exec`/
//! `window-change` (spec §4.3 Channel handling).
//!
//! `portable_pty` gives a synchronous, cross-platform PTY; its reader/writer
//! are bridged onto the async channel via a couple of blocking OS threads,
//! the same shape `std::thread` + `tokio::sync::mpsc` bridging takes whenever
//! a sync API has to feed an async world.

use std::io::{Read, Write};

use bytes::Bytes;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{mpsc::UnboundedSender, oneshot};

use crate::channel::PtyRequest;

/// One session channel's running command, either under a PTY or with plain
/// pipes (the `exec`/PTY-less-`shell` case).
pub struct ShellProcess {
    master: Option<Box<dyn MasterPty + Send>>,
    stdin_tx: std::sync::mpsc::Sender<Vec<u8>>,
}

impl ShellProcess {
    pub fn write_stdin(&self, data: &[u8]) {
        let _ = self.stdin_tx.send(data.to_vec());
    }

    pub fn resize(&self, req: &PtyRequest) {
        if let Some(master) = &self.master {
            let _ = master.resize(PtySize {
                rows: req.row_height as u16,
                cols: req.col_width as u16,
                pixel_width: req.pix_width as u16,
                pixel_height: req.pix_height as u16,
            });
        }
    }
}

/// Blocks on the child's exit in a dedicated thread and reports its exit
/// code once, so the caller can send `exit-status` and close the channel
/// instead of abandoning it (spec §4.3 `session` channel teardown).
fn spawn_exit_waiter(mut child: Box<dyn Child + Send + Sync>) -> oneshot::Receiver<u32> {
    let (tx, rx) = oneshot::channel();
    std::thread::spawn(move || {
        let code = child.wait().map(|status| status.exit_code()).unwrap_or(1);
        let _ = tx.send(code);
    });
    rx
}

fn spawn_stdin_writer(mut writer: Box<dyn Write + Send>) -> std::sync::mpsc::Sender<Vec<u8>> {
    let (tx, rx) = std::sync::mpsc::channel::<Vec<u8>>();
    std::thread::spawn(move || {
        while let Ok(chunk) = rx.recv() {
            if writer.write_all(&chunk).is_err() {
                break;
            }
            let _ = writer.flush();
        }
    });
    tx
}

/// Spawns a blocking reader thread that forwards output chunks to `on_data`
/// (a tokio unbounded sender, safe to call from any thread) until EOF.
fn spawn_output_reader(mut reader: Box<dyn Read + Send>, on_data: UnboundedSender<Bytes>) {
    std::thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if on_data.send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
}

/// Starts a login shell under a fresh PTY sized per `req` (spec §4.3
/// `pty-req`), wiring its output to `on_data`.
pub fn spawn_shell_with_pty(
    shell: &str,
    term: &str,
    req: &PtyRequest,
    on_data: UnboundedSender<Bytes>,
) -> anyhow::Result<(ShellProcess, oneshot::Receiver<u32>)> {
    let pty_system = native_pty_system();
    let pair = pty_system.openpty(PtySize {
        rows: req.row_height as u16,
        cols: req.col_width as u16,
        pixel_width: req.pix_width as u16,
        pixel_height: req.pix_height as u16,
    })?;

    let mut cmd = CommandBuilder::new(shell);
    cmd.env("TERM", term);
    let child = pair.slave.spawn_command(cmd)?;
    drop(pair.slave);

    let reader = pair.master.try_clone_reader()?;
    let writer = pair.master.take_writer()?;
    let stdin_tx = spawn_stdin_writer(writer);
    let exit_rx = spawn_exit_waiter(child);
    spawn_output_reader(reader, on_data);

    Ok((
        ShellProcess {
            master: Some(pair.master),
            stdin_tx,
        },
        exit_rx,
    ))
}

/// Runs `/bin/sh -c <cmd>` with plain piped stdio, no PTY (spec §4.3 `exec`).
pub fn spawn_exec(cmd: &str, on_data: UnboundedSender<Bytes>) -> anyhow::Result<(ShellProcess, oneshot::Receiver<u32>)> {
    let pty_system = native_pty_system();
    let pair = pty_system.openpty(PtySize {
        rows: 24,
        cols: 80,
        pixel_width: 0,
        pixel_height: 0,
    })?;

    let mut builder = CommandBuilder::new("/bin/sh");
    builder.arg("-c");
    builder.arg(cmd);
    let child = pair.slave.spawn_command(builder)?;
    drop(pair.slave);

    let reader = pair.master.try_clone_reader()?;
    let writer = pair.master.take_writer()?;
    let stdin_tx = spawn_stdin_writer(writer);
    let exit_rx = spawn_exit_waiter(child);
    spawn_output_reader(reader, on_data);

    Ok((
        ShellProcess {
            master: Some(pair.master),
            stdin_tx,
        },
        exit_rx,
    ))
}

/// `SHELL`, falling back to `/bin/bash` (spec §6 Environment).
pub fn discover_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
}

/// `TERM` for session PTYs, falling back to `xterm-256color` (spec §6).
pub fn discover_term() -> String {
    std::env::var("TERM").unwrap_or_else(|_| "xterm-256color".to_string())
}
