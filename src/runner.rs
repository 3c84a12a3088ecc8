// Copyright (c) 2021, Qualcomm Innovation Center, Inc. All rights reserved.
//
// SPDX-License-Identifier: BSD-3-Clause
//! Crash reproduction
//!
//! The [Runner] replays stored crashes against the target command one at a time and hands the
//! result to an [Extractor], which decides what a report looks like. Reports that are found are
//! attached to the crash in the store.
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::debugger::gdb::{ExploitableTriager, GdbTriageErrorKind};
use crate::platform::linux::exit_status_to_string;
use crate::process::{self, ExecOptions};
use crate::report::sanitizer::extract_sanitizer_block;
use crate::report::{Report, ReportKind};
use crate::store::{CrashRecord, CrashStore, StoreError};
use crate::util::{find_placeholder, shell_join, FILE_PLACEHOLDER};

pub const DEFAULT_TIMEOUT_MS: u64 = 10000;
pub const TIMED_OUT_TEXT: &str = "Crash case timed out.";

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Command `{0}` has no @@ placeholder for the crash input")]
    MissingPlaceholder(String),
    #[error("Malformed command `{0}`")]
    MalformedCommand(String),
    #[error("Failed to execute {program}: {source}")]
    Execution {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("Exploitable script {} does not exist", .0.display())]
    ScriptMissing(PathBuf),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// What to do with a command that has no `@@`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderPolicy {
    /// Feed the crash input on stdin
    Stdin,
    /// Refuse to run
    Strict,
}

impl Default for PlaceholderPolicy {
    fn default() -> Self {
        PlaceholderPolicy::Stdin
    }
}

/// A fully resolved target invocation for one crash
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub argv: Vec<String>,
    /// Crash input to stream on stdin, when the command has no placeholder
    pub stdin: Option<PathBuf>,
}

impl Invocation {
    pub fn command_line(&self) -> String {
        shell_join(&self.argv)
    }
}

/// The result of replaying one crash
#[derive(Debug)]
pub enum Reproduction {
    TimedOut,
    /// The target ran but left nothing to report
    NoReport(String),
    Found(Report),
}

/// Replays an [Invocation] and pulls a report out of it
pub trait Extractor {
    fn name(&self) -> &'static str;

    fn kind(&self) -> ReportKind;

    /// Only failures that make every other crash pointless to try should be `Err`
    fn reproduce(&self, invocation: &Invocation, timeout_ms: u64) -> Result<Reproduction, RunError>;
}

/// Runs the target directly and looks for a halting sanitizer report in its combined output
#[derive(Debug, Default)]
pub struct SanitizerExtractor;

impl Extractor for SanitizerExtractor {
    fn name(&self) -> &'static str {
        "sanitizer"
    }

    fn kind(&self) -> ReportKind {
        ReportKind::Sanitizer
    }

    fn reproduce(&self, invocation: &Invocation, timeout_ms: u64) -> Result<Reproduction, RunError> {
        let input = match &invocation.stdin {
            Some(path) => match fs::read(path) {
                Ok(data) => Some(data),
                Err(e) => {
                    return Ok(Reproduction::NoReport(format!(
                        "failed to read {}: {}",
                        path.display(),
                        e
                    )))
                }
            },
            None => None,
        };

        let options = ExecOptions {
            input: input.as_deref(),
            merge_output: true,
            ..Default::default()
        };

        let output = match process::execute_capture_output_timeout(
            &invocation.argv[0],
            &invocation.argv[1..],
            timeout_ms,
            &options,
        ) {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(Reproduction::TimedOut),
            Err(e) => {
                return Err(RunError::Execution {
                    program: invocation.argv[0].clone(),
                    source: e,
                })
            }
        };

        log::debug!(
            "{} exited with {} ({} bytes of output)",
            invocation.command_line(),
            exit_status_to_string(&output.status),
            output.stdout.len()
        );

        Ok(match extract_sanitizer_block(&output.stdout) {
            Some(body) => Reproduction::Found(Report::Sanitizer {
                text: body.to_string(),
            }),
            None => Reproduction::NoReport(format!(
                "no sanitizer report, target exited with {}",
                exit_status_to_string(&output.status)
            )),
        })
    }
}

/// Replays the crash under GDB with the `exploitable` plugin
pub struct ExploitableExtractor {
    triager: ExploitableTriager,
    abort_on_error: bool,
}

impl ExploitableExtractor {
    pub fn new(gdb_path: String, script: &Path, abort_on_error: bool) -> Result<Self, RunError> {
        let triager = ExploitableTriager::new(gdb_path, script).map_err(RunError::ScriptMissing)?;

        Ok(ExploitableExtractor {
            triager,
            abort_on_error,
        })
    }

    pub fn has_supported_gdb(&self) -> bool {
        self.triager.has_supported_gdb()
    }
}

impl Extractor for ExploitableExtractor {
    fn name(&self) -> &'static str {
        "exploitable"
    }

    fn kind(&self) -> ReportKind {
        ReportKind::Exploitable
    }

    fn reproduce(&self, invocation: &Invocation, timeout_ms: u64) -> Result<Reproduction, RunError> {
        let input_file = invocation
            .stdin
            .as_ref()
            .map(|p| p.to_string_lossy().to_string());

        match self.triager.triage_program(
            &invocation.argv,
            input_file.as_deref(),
            self.abort_on_error,
            timeout_ms,
        ) {
            Ok(Some(report)) => Ok(Reproduction::Found(Report::Exploitable(report))),
            Ok(None) => Ok(Reproduction::NoReport(
                "the target did not stop on a signal".to_string(),
            )),
            Err(e) => match e.error_kind {
                GdbTriageErrorKind::Timeout => Ok(Reproduction::TimedOut),
                GdbTriageErrorKind::Launch => Err(RunError::Execution {
                    program: self.triager.gdb_path.clone(),
                    source: io::Error::new(ErrorKind::Other, e.to_string()),
                }),
                GdbTriageErrorKind::Command => Ok(Reproduction::NoReport(e.to_string())),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeKind {
    TimedOut,
    Report(Report),
}

/// A crash that either timed out or produced a report
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub crash_id: i64,
    pub path: PathBuf,
    /// The command as it was run
    pub command: String,
    pub kind: OutcomeKind,
}

impl Outcome {
    pub fn timed_out(&self) -> bool {
        self.kind == OutcomeKind::TimedOut
    }

    pub fn text(&self) -> String {
        match &self.kind {
            OutcomeKind::TimedOut => TIMED_OUT_TEXT.to_string(),
            OutcomeKind::Report(report) => report.text(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "---CRASH SUMMARY---\nFilename: {}\nCommand: {}\n{}\n---END SUMMARY---",
            self.path.display(),
            self.command,
            self.text()
        )
    }
}

fn timeout_note(path: &Path, command: &str, timeout_ms: u64) -> String {
    format!("{} timed out after {}ms (command: {})", path.display(), timeout_ms, command)
}

fn no_report_note(extractor: &str, path: &Path, command: &str, reason: &str) -> String {
    format!(
        "No {} report for {} (command: {}): {}",
        extractor,
        path.display(),
        command,
        reason
    )
}

pub struct Runner {
    pub policy: PlaceholderPolicy,
    pub timeout_ms: u64,
}

impl Default for Runner {
    fn default() -> Self {
        Runner::new(DEFAULT_TIMEOUT_MS)
    }
}

impl Runner {
    pub fn new(timeout_ms: u64) -> Runner {
        Runner {
            policy: PlaceholderPolicy::default(),
            timeout_ms,
        }
    }

    pub fn with_policy(mut self, policy: PlaceholderPolicy) -> Runner {
        self.policy = policy;
        self
    }

    /// Split a command template and check it against the placeholder policy
    pub fn parse_template(&self, template: &str) -> Result<Vec<String>, RunError> {
        let argv = match shlex::split(template) {
            Some(argv) if !argv.is_empty() => argv,
            _ => return Err(RunError::MalformedCommand(template.to_string())),
        };

        if find_placeholder(&argv).is_none() && self.policy == PlaceholderPolicy::Strict {
            return Err(RunError::MissingPlaceholder(template.to_string()));
        }

        Ok(argv)
    }

    /// Only the first placeholder is the crash input
    pub fn invocation(argv: &[String], path: &Path) -> Invocation {
        match find_placeholder(argv) {
            Some(pos) => {
                let mut argv = argv.to_vec();
                argv[pos] = path.to_string_lossy().to_string();
                Invocation { argv, stdin: None }
            }
            None => Invocation {
                argv: argv.to_vec(),
                stdin: Some(path.to_path_buf()),
            },
        }
    }

    pub fn run<E: Extractor + ?Sized>(
        &self,
        template: &str,
        records: &[CrashRecord],
        extractor: &E,
        store: &CrashStore,
    ) -> Result<Vec<Outcome>, RunError> {
        self.run_with(template, records, extractor, store, |_, _| ())
    }

    /// Like [Runner::run], calling `progress` after each crash with its outcome, if any
    pub fn run_with<E, F>(
        &self,
        template: &str,
        records: &[CrashRecord],
        extractor: &E,
        store: &CrashStore,
        mut progress: F,
    ) -> Result<Vec<Outcome>, RunError>
    where
        E: Extractor + ?Sized,
        F: FnMut(&CrashRecord, Option<&Outcome>),
    {
        let argv = self.parse_template(template)?;

        if find_placeholder(&argv).is_none() {
            log::info!("No {} in the command, crash inputs go to stdin", FILE_PLACEHOLDER);
        }

        let mut outcomes = vec![];

        for record in records {
            let invocation = Runner::invocation(&argv, &record.path);
            let command = invocation.command_line();

            log::debug!("Reproducing {} with {}", record.path.display(), command);

            let kind = match extractor.reproduce(&invocation, self.timeout_ms)? {
                Reproduction::TimedOut => {
                    log::warn!("{}", timeout_note(&record.path, &command, self.timeout_ms));
                    OutcomeKind::TimedOut
                }
                Reproduction::NoReport(reason) => {
                    log::warn!(
                        "{}",
                        no_report_note(extractor.name(), &record.path, &command, &reason)
                    );
                    progress(record, None);
                    continue;
                }
                Reproduction::Found(report) => {
                    if !store.attach_report(record.id, &report)? {
                        log::debug!(
                            "{} already has a {} report, keeping the stored one",
                            record.path.display(),
                            extractor.kind()
                        );
                    }
                    OutcomeKind::Report(report)
                }
            };

            outcomes.push(Outcome {
                crash_id: record.id,
                path: record.path.clone(),
                command,
                kind,
            });

            progress(record, outcomes.last());
        }

        Ok(outcomes)
    }
}
