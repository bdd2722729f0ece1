//! Unix pty execution path: spawn the wrapper script under a real pseudo-
//! terminal so full-screen and color-producing tools behave normally,
//! mirror its output live, and enforce the caller's timeout by killing the
//! child if it overruns.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tracing::warn;

use crate::RawOutput;

pub async fn run(shell_bin: &str, wrapper: &str, timeout: Duration) -> RawOutput {
    let shell_bin = shell_bin.to_string();
    let wrapper = wrapper.to_string();

    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::spawn(move || {
        let result = run_blocking(&shell_bin, &wrapper, timeout);
        let _ = tx.send(result);
    });

    match rx.await {
        Ok(result) => result,
        Err(_) => RawOutput {
            success: false,
            stdout: String::new(),
            stderr: "shell worker thread panicked".to_string(),
            timed_out: false,
        },
    }
}

fn run_blocking(shell_bin: &str, wrapper: &str, timeout: Duration) -> RawOutput {
    let pty_system = native_pty_system();
    let pair = match pty_system.openpty(PtySize {
        rows: 40,
        cols: 120,
        pixel_width: 0,
        pixel_height: 0,
    }) {
        Ok(pair) => pair,
        Err(err) => {
            return RawOutput {
                success: false,
                stdout: String::new(),
                stderr: format!("failed to open pty: {err}"),
                timed_out: false,
            }
        }
    };

    let mut cmd = CommandBuilder::new(shell_bin);
    cmd.arg("-c");
    cmd.arg(wrapper);

    let mut child = match pair.slave.spawn_command(cmd) {
        Ok(child) => child,
        Err(err) => {
            return RawOutput {
                success: false,
                stdout: String::new(),
                stderr: format!("failed to spawn shell: {err}"),
                timed_out: false,
            }
        }
    };
    drop(pair.slave);

    let mut reader = match pair.master.try_clone_reader() {
        Ok(reader) => reader,
        Err(err) => {
            return RawOutput {
                success: false,
                stdout: String::new(),
                stderr: format!("failed to clone pty reader: {err}"),
                timed_out: false,
            }
        }
    };

    let buffer = Arc::new(Mutex::new(Vec::new()));
    let reader_done = Arc::new(AtomicBool::new(false));
    {
        let buffer = Arc::clone(&buffer);
        let reader_done = Arc::clone(&reader_done);
        std::thread::spawn(move || {
            let mut chunk = [0u8; 4096];
            let mut stdout = std::io::stdout();
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        let _ = stdout.write_all(&chunk[..n]);
                        let _ = stdout.flush();
                        let mut guard = buffer.lock().expect("pty buffer mutex poisoned");
                        guard.extend_from_slice(&chunk[..n]);
                    }
                    Err(_) => break,
                }
            }
            reader_done.store(true, Ordering::SeqCst);
        });
    }

    let deadline = std::time::Instant::now() + timeout;
    let mut timed_out = false;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) => {
                if std::time::Instant::now() >= deadline {
                    timed_out = true;
                    if let Err(err) = child.kill() {
                        warn!(?err, "failed to kill timed-out pty child");
                    }
                    let _ = child.wait();
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(_) => break,
        }
    }

    // Give the reader thread a moment to drain whatever is left in the pty
    // buffer after the child has exited.
    for _ in 0..25 {
        if reader_done.load(Ordering::SeqCst) {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    let status = child.wait().ok();
    let success = status.map(|s| s.success()).unwrap_or(false);
    let stdout = {
        let guard = buffer.lock().expect("pty buffer mutex poisoned");
        String::from_utf8_lossy(&guard).to_string()
    };

    RawOutput {
        success,
        stdout,
        stderr: String::new(),
        timed_out,
    }
}
