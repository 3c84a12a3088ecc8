// Copyright (c) 2021, Qualcomm Innovation Center, Inc. All rights reserved.
//
// SPDX-License-Identifier: BSD-3-Clause
//! Child process execution
//!
//! Targets are started in their own process group. [ProcessGroupGuard] owns the child for
//! the duration of a run and kills the whole group when it goes out of scope, so a target
//! that forks (or a debugger and its inferior) cannot outlive a timeout.
use std::ffi::OsStr;
use std::io::{self, ErrorKind, Read, Result, Write};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use wait_timeout::ChildExt;

#[derive(Debug)]
pub struct ChildResult {
    pub stdout: String,
    /// Empty when stderr was merged into stdout
    pub stderr: String,
    pub status: ExitStatus,
}

/// How to feed and observe a child
#[derive(Debug, Default)]
pub struct ExecOptions<'a> {
    /// Bytes written to the child's stdin. `None` attaches /dev/null
    pub input: Option<&'a [u8]>,
    /// Extra environment on top of ours
    pub env: Vec<(String, String)>,
    /// Send stdout and stderr down one pipe, keeping their interleaving
    pub merge_output: bool,
}

pub fn execute_capture_output<S: AsRef<OsStr>>(command: &str, args: &[S]) -> Result<ChildResult> {
    let output = Command::new(command).args(args).output()?;

    Ok(ChildResult {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        status: output.status,
    })
}

/// Kills the child's entire process group and reaps the child when dropped
struct ProcessGroupGuard {
    child: Child,
}

impl ProcessGroupGuard {
    fn kill_group(&mut self) {
        // The child is the group leader, so its pid is the pgid. Surviving members keep the
        // pgid allocated after the leader is reaped, and an empty group answers ESRCH
        let pgid = self.child.id() as libc::pid_t;

        if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
            let e = io::Error::last_os_error();

            if e.raw_os_error() != Some(libc::ESRCH) {
                log::debug!("Failed to kill process group {}: {}", pgid, e);
            }
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill_group();

        if let Err(e) = self.child.wait() {
            log::warn!("Failed to reap child {}: {}", self.child.id(), e);
        }
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut data = Vec::new();
        // whatever was read before an error is still useful
        let _ = reader.read_to_end(&mut data);
        data
    })
}

fn join_output(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .map(|h| h.join().unwrap_or_default())
        .map(|data| String::from_utf8_lossy(&data).to_string())
        .unwrap_or_default()
}

/// Run `command` to completion or until `timeout_ms` elapses.
///
/// On timeout the process group is killed, any buffered output is drained and discarded, and
/// an error of kind [ErrorKind::TimedOut] is returned. Failing to spawn `command` is reported
/// as the spawn error itself (usually [ErrorKind::NotFound] or [ErrorKind::PermissionDenied]).
pub fn execute_capture_output_timeout<S: AsRef<OsStr>>(
    command: &str,
    args: &[S],
    timeout_ms: u64,
    options: &ExecOptions,
) -> Result<ChildResult> {
    let mut cmd = Command::new(command);

    cmd.args(args).process_group(0);

    for (key, value) in &options.env {
        cmd.env(key, value);
    }

    cmd.stdin(if options.input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    let merged_reader = if options.merge_output {
        let (reader, writer) = io::pipe()?;
        cmd.stdout(writer.try_clone()?).stderr(writer);
        Some(reader)
    } else {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        None
    };

    let child = cmd.spawn()?;
    // Our copies of the pipe write ends live in `cmd`. Readers only see EOF once they are gone
    drop(cmd);

    let mut guard = ProcessGroupGuard { child };

    let (stdout_handle, stderr_handle) = match merged_reader {
        Some(reader) => (Some(drain(reader)), None),
        None => (
            guard.child.stdout.take().map(drain),
            guard.child.stderr.take().map(drain),
        ),
    };

    let stdin_handle = match (options.input, guard.child.stdin.take()) {
        (Some(input), Some(mut stdin)) => {
            let input = input.to_vec();
            Some(thread::spawn(move || {
                // targets are free to exit without reading all of their input
                if let Err(e) = stdin.write_all(&input) {
                    if e.kind() != ErrorKind::BrokenPipe {
                        log::debug!("Failed to write child stdin: {}", e);
                    }
                }
            }))
        }
        _ => None,
    };

    let status = guard
        .child
        .wait_timeout(Duration::from_millis(timeout_ms))?;

    // Reaps the child and takes down anything it left behind in its group
    drop(guard);

    let stdout = join_output(stdout_handle);
    let stderr = join_output(stderr_handle);

    if let Some(handle) = stdin_handle {
        let _ = handle.join();
    }

    match status {
        Some(status) => Ok(ChildResult {
            stdout,
            stderr,
            status,
        }),
        None => Err(io::Error::new(
            ErrorKind::TimedOut,
            format!("Timed out after {}ms", timeout_ms),
        )),
    }
}
