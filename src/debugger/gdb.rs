// Copyright (c) 2021, Qualcomm Innovation Center, Inc. All rights reserved.
//
// SPDX-License-Identifier: BSD-3-Clause
//! GNU Debugger (GDB) exploitability triage
//!
//! Crashes are replayed under `gdb --batch` with the CERT `exploitable` plugin loaded. After
//! the target stops, GDB dumps the registers and runs `exploitable -v`. GDB's own output,
//! the target's output and the plugin's output all share GDB's stdout, so every command of
//! interest is bracketed with marker lines printed from GDB's python interpreter and the
//! relevant parts are cut out afterwards.
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::process::{self, ExecOptions};
use crate::report::ExploitableReport;
use crate::util::shell_join;

/// What type of triage error occurred
#[derive(Debug, PartialEq, Eq, Hash)]
pub enum GdbTriageErrorKind {
    /// GDB could not be started at all
    Launch,
    Command,
    Timeout,
}

/// Information on the triage error that occurred
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct GdbTriageError {
    pub error_kind: GdbTriageErrorKind,
    pub error: String,
    pub detail: Option<String>,
}

impl GdbTriageError {
    pub fn new(error_kind: GdbTriageErrorKind, error: &str, detail: String) -> GdbTriageError {
        GdbTriageError {
            error_kind,
            error: error.to_string(),
            detail: Some(detail),
        }
    }

    pub fn new_brief(error_kind: GdbTriageErrorKind, error: String) -> GdbTriageError {
        GdbTriageError {
            error_kind,
            error,
            detail: None,
        }
    }
}

impl std::fmt::Display for GdbTriageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.error, detail.trim_end()),
            None => write!(f, "{}", self.error),
        }
    }
}

#[doc(hidden)]
macro_rules! vec_of_strings {
    ($($x:expr),*) => (vec![$($x.to_string()),*]);
}

#[doc(hidden)]
struct DbgMarker {
    start: &'static str,
    end: &'static str,
    gdb_start: &'static str,
    gdb_end: &'static str,
}

impl DbgMarker {
    fn extract<'a>(&self, text: &'a str) -> Result<&'a str, String> {
        match text.find(self.start) {
            Some(mut start_idx) => {
                match text[start_idx..].find(self.end) {
                    Some(end_rel) => {
                        let end_idx = start_idx + end_rel;
                        // assuming its printed as a newline
                        start_idx += self.start.len() + 1;

                        if start_idx <= end_idx {
                            Ok(&text[start_idx..end_idx])
                        } else {
                            Ok("")
                        }
                    }
                    None => Err(format!("Could not find {}", self.end)),
                }
            }
            None => Err(format!("Could not find {}", self.start)),
        }
    }
}

// Some versions of GDB don't flush output before starting a child, so explicitly flush
macro_rules! make_gdb_marker {
    ( $string:expr ) => {
        concat!(
            "python [(x.write('",
            $string,
            "\\n'),x.flush()) for x in [sys.stdout, sys.stderr]]"
        )
    };
}

macro_rules! make_marker {
    ( $string:expr ) => {
        DbgMarker {
            start: concat!("----", $string, "_START----"),
            end: concat!("----", $string, "_END----"),
            gdb_start: make_gdb_marker!(concat!("----", $string, "_START----")),
            gdb_end: make_gdb_marker!(concat!("----", $string, "_END----")),
        }
    };
}

lazy_static! {
    #[doc(hidden)]
    static ref MARKER_REGISTERS: DbgMarker = make_marker!("ATRIAGE_REGISTERS");
    #[doc(hidden)]
    static ref MARKER_EXPLOITABLE: DbgMarker = make_marker!("ATRIAGE_EXPLOITABLE");
}

/// `ASAN_OPTIONS` with `abort_on_error=1` appended unless already requested
pub fn asan_options_with_abort(current: Option<&str>) -> String {
    match current {
        Some(opts) if opts.contains("abort_on_error=1") || opts.contains("abort_on_error=true") => {
            opts.to_string()
        }
        Some(opts) if !opts.trim().is_empty() => format!("{}:abort_on_error=1", opts),
        _ => "abort_on_error=1".to_string(),
    }
}

/// Triage crashes using GDB and the `exploitable` plugin
pub struct ExploitableTriager {
    script: PathBuf,
    pub gdb_path: String,
}

impl ExploitableTriager {
    /// `script` is the plugin's `exploitable.py`. It is checked here, not per crash
    pub fn new(gdb_path: String, script: &Path) -> Result<ExploitableTriager, PathBuf> {
        if !script.is_file() {
            return Err(script.to_path_buf());
        }

        Ok(ExploitableTriager {
            script: script.to_path_buf(),
            gdb_path,
        })
    }

    /// Confirm that the selected GDB executable has python support
    pub fn has_supported_gdb(&self) -> bool {
        let python_cmd = "python import gdb, sys; print('V:'+gdb.execute('show version', to_string=True).splitlines()[0]); print('P:'+sys.version.splitlines()[0].strip())";
        let gdb_args = vec!["--nx", "--batch", "-iex", python_cmd];

        let output = match process::execute_capture_output(&self.gdb_path, &gdb_args) {
            Ok(o) => o,
            Err(e) => {
                log::error!("Failed to execute specified GDB '{}': {}", &self.gdb_path, e);
                return false;
            }
        };

        let decoded_stdout = &output.stdout;

        let version = decoded_stdout
            .find("V:")
            .and_then(|start_idx| decoded_stdout[start_idx + 2..].lines().next());

        let python_version = decoded_stdout
            .find("P:")
            .and_then(|start_idx| decoded_stdout[start_idx + 2..].lines().next());

        match (output.status.success(), version, python_version) {
            (true, Some(version), Some(python_version)) => {
                log::info!("GDB is working ({} - Python {})", version, python_version);
                true
            }
            _ => {
                log::error!(
                    "GDB check failure\nARGS:{}\nSTDOUT: {}\nSTDERR: {}",
                    shell_join(&gdb_args),
                    decoded_stdout,
                    output.stderr
                );
                false
            }
        }
    }

    fn gdb_args(&self, prog_args: &[String], input_file: Option<&str>) -> Vec<String> {
        let gdb_run_command = match input_file {
            // GDB overwrites args in the format (damn you)
            // Using this version of run uses the shell to run the command.
            Some(file) => format!("run {} < {}", shell_join(&prog_args[1..]), shlex::quote(file)),
            None => String::from("run"),
        };

        #[rustfmt::skip]
        let gdb_args = vec_of_strings!(
            "--nx", "--batch",
            "-iex", "set print inferior-events off",
            "-iex", "set python print-stack full",
            "-iex", "set pagination off",
            "-ex", format!("source {}", self.script.display()),
            "-ex", gdb_run_command,
            "-ex", MARKER_REGISTERS.gdb_start,
            "-ex", "info registers",
            "-ex", MARKER_REGISTERS.gdb_end,
            "-ex", MARKER_EXPLOITABLE.gdb_start,
            "-ex", "exploitable -v",
            "-ex", MARKER_EXPLOITABLE.gdb_end,
            "--args"
        );

        [&gdb_args[..], prog_args].concat()
    }

    /// Execute a target program under GDB and classify the crash, if any.
    ///
    /// `input_file` is fed on the target's stdin; pass `None` when `prog_args` already refer to
    /// the crash input. `Ok(None)` means the target did not stop in a way `exploitable` could
    /// classify.
    pub fn triage_program(
        &self,
        prog_args: &[String],
        input_file: Option<&str>,
        abort_on_error: bool,
        timeout_ms: u64,
    ) -> Result<Option<ExploitableReport>, GdbTriageError> {
        let gdb_cmdline = self.gdb_args(prog_args, input_file);

        let mut options = ExecOptions::default();

        if abort_on_error {
            let current = std::env::var("ASAN_OPTIONS").ok();
            options.env.push((
                "ASAN_OPTIONS".to_string(),
                asan_options_with_abort(current.as_deref()),
            ));
        }

        // Never write to stdin for GDB as it can pass testcases to the target using "run < FILE"
        let output = match process::execute_capture_output_timeout(&self.gdb_path, &gdb_cmdline, timeout_ms, &options) {
            Ok(o) => o,
            Err(e) => {
                return Err(match e.kind() {
                    ErrorKind::TimedOut => GdbTriageError::new(
                        GdbTriageErrorKind::Timeout,
                        "Timed out when triaging",
                        e.to_string(),
                    ),
                    _ => GdbTriageError::new(
                        GdbTriageErrorKind::Launch,
                        "Failed to execute GDB command",
                        e.to_string(),
                    ),
                });
            }
        };

        log::debug!(
            "GDB CMDLINE: {}\nSTDOUT:\n{}\nSTDERR:\n{}",
            shell_join(&[std::slice::from_ref(&self.gdb_path), &gdb_cmdline[..]].concat()),
            output.stdout,
            output.stderr
        );

        // It's not unheard of for GDB itself to crash, OOM, or BUG the kernel...
        if !output.status.success() {
            return Err(GdbTriageError::new_brief(
                GdbTriageErrorKind::Command,
                format!(
                    "GDB exited with {}",
                    crate::platform::linux::exit_status_to_string(&output.status)
                ),
            ));
        }

        let exploitable_output = MARKER_EXPLOITABLE
            .extract(&output.stdout)
            .map_err(|e| GdbTriageError::new(GdbTriageErrorKind::Command, "Failed to get exploitable output from GDB", e))?;

        // Registers are a nicety, don't fail the crash over them
        let registers = MARKER_REGISTERS.extract(&output.stdout).ok();

        Ok(ExploitableReport::parse(exploitable_output, registers))
    }
}
