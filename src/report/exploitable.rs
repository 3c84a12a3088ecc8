// Copyright (c) 2021, Qualcomm Innovation Center, Inc. All rights reserved.
//
// SPDX-License-Identifier: BSD-3-Clause
//! Parsing of the CERT `exploitable` GDB plugin's verbose output
//!
//! `exploitable -v` prints a few free-form sections followed by `Key: value` lines:
//!
//! ```text
//! Signal si_signo: 11 Signal si_addr: 0x0
//! Nearby code:
//!    0x0000555555554640 <+0>:    push   rbp
//! => 0x000055555555464a <+10>:   mov    DWORD PTR [rax],0x0
//! Stack trace:
//! #  0 main at 0x55555555464a in /tmp/a.out
//! Faulting frame: #  0 main at 0x55555555464a in /tmp/a.out
//! Description: Access violation on destination operand
//! Short description: DestAv (8/22)
//! Hash: 4d5e9c8c0e0fb9ea0bdd1fdf7a1c98c7.4d5e9c8c0e0fb9ea0bdd1fdf7a1c98c7
//! Exploitability Classification: EXPLOITABLE
//! Explanation: The target crashed on an access violation at an address matching ...
//! ```
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExploitableReport {
    pub signal_info: Option<String>,
    /// Instructions around the faulting pc
    pub disassembly: Option<String>,
    pub stack_trace: Option<String>,
    pub faulting_frame: Option<String>,
    pub description: Option<String>,
    pub short_description: Option<String>,
    /// exploitable's major.minor stack hash
    pub hash: Option<String>,
    /// EXPLOITABLE, PROBABLY_EXPLOITABLE, PROBABLY_NOT_EXPLOITABLE or UNKNOWN
    pub exploitability: Option<String>,
    pub explanation: Option<String>,
    /// GDB `info registers` at the time of the crash
    pub register_info: Option<String>,
}

#[derive(PartialEq)]
enum Section {
    None,
    NearbyCode,
    StackTrace,
}

fn non_empty(lines: Vec<&str>) -> Option<String> {
    let text = lines.join("\n");
    let text = text.trim_end();

    if text.trim().is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn value(text: &str) -> Option<String> {
    let text = text.trim();

    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

impl ExploitableReport {
    /// Parse `exploitable -v` output. Returns `None` unless a classification or description
    /// was found, which is the case when the target did not stop on a signal.
    pub fn parse(output: &str, registers: Option<&str>) -> Option<ExploitableReport> {
        let mut report = ExploitableReport::default();
        let mut section = Section::None;
        let mut nearby_code = vec![];
        let mut stack_trace = vec![];

        for line in output.lines() {
            if line.starts_with("Signal si_signo") {
                report.signal_info = value(line);
                section = Section::None;
                continue;
            } else if line.starts_with("Nearby code:") {
                section = Section::NearbyCode;
                continue;
            } else if line.starts_with("Stack trace:") {
                section = Section::StackTrace;
                continue;
            }

            if let Some((key, rest)) = line.split_once(": ") {
                let field = match key {
                    "Faulting frame" => Some(&mut report.faulting_frame),
                    "Description" => Some(&mut report.description),
                    "Short description" => Some(&mut report.short_description),
                    "Hash" => Some(&mut report.hash),
                    "Exploitability Classification" => Some(&mut report.exploitability),
                    "Explanation" => Some(&mut report.explanation),
                    "Other tags" => None,
                    _ => {
                        match section {
                            Section::NearbyCode => nearby_code.push(line),
                            Section::StackTrace => stack_trace.push(line),
                            Section::None => (),
                        }
                        continue;
                    }
                };

                if let Some(field) = field {
                    *field = value(rest);
                }
                section = Section::None;
                continue;
            }

            match section {
                Section::NearbyCode => nearby_code.push(line),
                Section::StackTrace => stack_trace.push(line),
                Section::None => (),
            }
        }

        if report.exploitability.is_none() && report.description.is_none() {
            return None;
        }

        report.disassembly = non_empty(nearby_code);
        report.stack_trace = non_empty(stack_trace);
        report.register_info = registers.and_then(|r| non_empty(r.lines().collect()));

        Some(report)
    }

    pub fn headline(&self) -> String {
        format!(
            "{}: {}",
            self.exploitability.as_deref().unwrap_or("UNKNOWN"),
            self.short_description
                .as_deref()
                .or(self.description.as_deref())
                .unwrap_or("no description")
        )
    }

    pub fn format_text(&self) -> String {
        let mut text = String::new();

        let fields = [
            ("Exploitability Classification", &self.exploitability),
            ("Description", &self.description),
            ("Short description", &self.short_description),
            ("Hash", &self.hash),
            ("Explanation", &self.explanation),
            ("Signal", &self.signal_info),
            ("Faulting frame", &self.faulting_frame),
        ];

        for (name, field) in fields.iter() {
            if let Some(v) = field {
                text += &format!("{}: {}\n", name, v);
            }
        }

        let sections = [
            ("Stack trace", &self.stack_trace),
            ("Nearby code", &self.disassembly),
            ("Registers", &self.register_info),
        ];

        for (name, section) in sections.iter() {
            if let Some(v) = section {
                text += &format!("{}:\n{}\n", name, v);
            }
        }

        text.trim_end().to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const EXPLOITABLE_OUTPUT: &str = "'exploitable' version 1.32
Linux box 5.4.0-42-generic #46-Ubuntu SMP x86_64
Signal si_signo: 11 Signal si_addr: 0x0
Nearby code:
   0x0000555555554640 <+0>:\tpush   rbp
   0x0000555555554641 <+1>:\tmov    rbp,rsp
=> 0x000055555555464a <+10>:\tmov    DWORD PTR [rax],0x0
Stack trace:
#  0 main at 0x55555555464a in /tmp/a.out
#  1 __libc_start_main at 0x7ffff7a05b97 in /lib/x86_64-linux-gnu/libc-2.27.so
Faulting frame: #  0 main at 0x55555555464a in /tmp/a.out
Description: Access violation on destination operand
Short description: DestAv (8/22)
Hash: 4d5e9c8c0e0fb9ea0bdd1fdf7a1c98c7.4d5e9c8c0e0fb9ea0bdd1fdf7a1c98c7
Exploitability Classification: EXPLOITABLE
Explanation: The target crashed on an access violation at an address matching the destination operand of the instruction.
Other tags: AccessViolation (21/22)
";

    #[test]
    fn test_parse_exploitable() {
        let r = ExploitableReport::parse(EXPLOITABLE_OUTPUT, Some("rax 0x0 0\nrip 0x55555555464a\n"))
            .unwrap();

        assert_eq!(r.signal_info.as_deref(), Some("Signal si_signo: 11 Signal si_addr: 0x0"));
        assert_eq!(r.exploitability.as_deref(), Some("EXPLOITABLE"));
        assert_eq!(r.short_description.as_deref(), Some("DestAv (8/22)"));
        assert_eq!(
            r.hash.as_deref(),
            Some("4d5e9c8c0e0fb9ea0bdd1fdf7a1c98c7.4d5e9c8c0e0fb9ea0bdd1fdf7a1c98c7")
        );
        assert_eq!(
            r.faulting_frame.as_deref(),
            Some("#  0 main at 0x55555555464a in /tmp/a.out")
        );
        assert_eq!(r.disassembly.as_ref().unwrap().lines().count(), 3);
        assert!(r.disassembly.as_ref().unwrap().starts_with("   0x0000555555554640 <+0>:"));
        assert_eq!(r.stack_trace.as_ref().unwrap().lines().count(), 2);
        assert_eq!(r.register_info.as_deref(), Some("rax 0x0 0\nrip 0x55555555464a"));
        assert_eq!(r.headline(), "EXPLOITABLE: DestAv (8/22)");

        let text = r.format_text();
        assert!(text.starts_with("Exploitability Classification: EXPLOITABLE\n"));
        assert!(text.contains("Stack trace:\n#  0 main"));
    }

    #[test]
    fn test_parse_no_crash() {
        assert_eq!(ExploitableReport::parse("No frame is currently selected.\n", None), None);
        assert_eq!(ExploitableReport::parse("", Some("rax 0x0")), None);
    }
}
