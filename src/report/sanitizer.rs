// Copyright (c) 2021, Qualcomm Innovation Center, Inc. All rights reserved.
//
// SPDX-License-Identifier: BSD-3-Clause
use regex::Regex;

lazy_static! {
    /// Sanitizers open a report with a run of exactly 65 `=` and, when halting, close it with
    /// `==PID==ABORTING`. Merged output can put the banner after an unterminated line.
    static ref R_SANITIZER_BLOCK: Regex = Regex::new(
        r#"(?ms)(?:^|[^=])={65}\r?\n(?P<body>.*?)\r?\n==[0-9]+==ABORTING"#
    )
    .unwrap();
    static ref R_ASAN_HEADLINE: Regex = Regex::new(
        r#"(?x)
        (?P<pid>=+[0-9]+=+)\s*ERROR:\s*(?P<sanitizer>[A-Za-z]+Sanitizer):\s*
        (attempting\s)?(?P<reason>[-_A-Za-z0-9]+)[^\r\n]*[\r\n]*
        (?P<operation>[-_A-Za-z0-9]+)?
        "#
    )
    .unwrap();
}

/// Locate the first complete sanitizer report in a target's output and return the text
/// between the delimiters.
pub fn extract_sanitizer_block(output: &str) -> Option<&str> {
    R_SANITIZER_BLOCK
        .captures(output)
        .and_then(|caps| caps.name("body"))
        .map(|body| body.as_str())
}

#[derive(Debug, PartialEq)]
pub struct SanitizerHeadline {
    pub sanitizer: String,
    pub stop_reason: String,
    /// READ or WRITE. Empty for SEGV and reports that don't name one
    pub operation: String,
}

impl SanitizerHeadline {
    pub fn headline(&self) -> String {
        if self.operation.is_empty() {
            format!("{} detected {}", self.sanitizer, self.stop_reason)
        } else {
            format!(
                "{} detected {} after a {}",
                self.sanitizer, self.stop_reason, self.operation
            )
        }
    }
}

/// Pick apart the headline of the newest sanitizer report in `input`
pub fn sanitizer_headline_extract(input: &str) -> Option<SanitizerHeadline> {
    // regex doesn't support finding in reverse so we go at it forward
    let caps = R_ASAN_HEADLINE.captures_iter(input).last()?;

    let sanitizer = caps.name("sanitizer")?.as_str().to_string();
    let stop_reason = caps.name("reason")?.as_str().to_string();

    let operation = match caps.name("operation") {
        Some(_) if stop_reason == "SEGV" => "",
        Some(op) => op.as_str(),
        None => "",
    };

    Some(SanitizerHeadline {
        sanitizer,
        stop_reason,
        operation: operation.to_string(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    const ASAN_OOB_READ: &str = "Some target chatter
=================================================================
==21523==ERROR: AddressSanitizer: stack-buffer-overflow on address 0x7ffd1ea4c8a4 at pc 0x5561e001bba8 bp 0x7ffd1ea4c830 sp 0x7ffd1ea4c820
READ of size 4 at 0x7ffd1ea4c8a4 thread T0
    #0 0x5561e001bba7 in crash_oob_read /tmp/test.c:20
    #1 0x5561e001bd3c in main /tmp/test.c:48
    #2 0x7f3f8a0b3bf6 in __libc_start_main (/lib/x86_64-linux-gnu/libc.so.6+0x21bf6)

SUMMARY: AddressSanitizer: stack-buffer-overflow /tmp/test.c:20 in crash_oob_read
==21523==ABORTING
trailing output
";

    #[test]
    fn test_sanitizer_block() {
        let body = extract_sanitizer_block(ASAN_OOB_READ).unwrap();

        assert!(body.starts_with("==21523==ERROR: AddressSanitizer: stack-buffer-overflow"));
        assert!(body.ends_with("in crash_oob_read"));
        assert!(!body.contains("ABORTING"));
        assert!(!body.contains("================"));

        assert_eq!(
            extract_sanitizer_block(&format!("{}\nline one\nline two\n==7==ABORTING\n", "=".repeat(65))),
            Some("line one\nline two")
        );
    }

    #[test]
    fn test_sanitizer_block_after_partial_line() {
        // unbuffered stderr chatter without a trailing newline, then the banner
        let output = format!(
            "reading input...{}\n==9==ERROR: AddressSanitizer: SEGV\nSUMMARY: x\n==9==ABORTING\n",
            "=".repeat(65)
        );

        assert_eq!(
            extract_sanitizer_block(&output),
            Some("==9==ERROR: AddressSanitizer: SEGV\nSUMMARY: x")
        );
    }

    #[test]
    fn test_sanitizer_block_rejects_partial() {
        // 64 and 66 characters are not a sanitizer banner
        assert_eq!(
            extract_sanitizer_block(&format!("{}\nbody\n==7==ABORTING\n", "=".repeat(64))),
            None
        );
        assert_eq!(
            extract_sanitizer_block(&format!("{}\nbody\n==7==ABORTING\n", "=".repeat(66))),
            None
        );
        assert_eq!(
            extract_sanitizer_block(&format!("chatter{}\nbody\n==7==ABORTING\n", "=".repeat(66))),
            None
        );
        // halt_on_error=0 style reports never abort
        assert_eq!(
            extract_sanitizer_block(&format!("{}\nbody\nSUMMARY: AddressSanitizer: SEGV\n", "=".repeat(65))),
            None
        );
        assert_eq!(extract_sanitizer_block(""), None);
    }

    #[test]
    fn test_asan_headline_parsing() {
        let h = sanitizer_headline_extract(ASAN_OOB_READ).unwrap();

        assert_eq!(h.sanitizer, "AddressSanitizer");
        assert_eq!(h.stop_reason, "stack-buffer-overflow");
        assert_eq!(h.operation, "READ");
        assert_eq!(
            h.headline(),
            "AddressSanitizer detected stack-buffer-overflow after a READ"
        );

        assert!(sanitizer_headline_extract("").is_none());

        assert_eq!(
            sanitizer_headline_extract("==1==ERROR: AddressSanitizer: CODE\n").unwrap(),
            SanitizerHeadline {
                sanitizer: "AddressSanitizer".into(),
                stop_reason: "CODE".into(),
                operation: "".into(),
            }
        );
    }

    #[test]
    fn test_segv_has_no_operation() {
        let h = sanitizer_headline_extract(
            "==32232==ERROR: AddressSanitizer: SEGV on unknown address 0x000000000000\n\
             ==32232==The signal is caused by a READ memory access.\n",
        )
        .unwrap();

        assert_eq!(h.stop_reason, "SEGV");
        assert_eq!(h.operation, "");
        assert_eq!(h.headline(), "AddressSanitizer detected SEGV");
    }
}
