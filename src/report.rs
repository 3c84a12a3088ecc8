// Copyright (c) 2021, Qualcomm Innovation Center, Inc. All rights reserved.
//
// SPDX-License-Identifier: BSD-3-Clause
//! Diagnostics extracted while reproducing a crash
use serde::Serialize;
use std::fmt;

pub mod exploitable;
pub mod sanitizer;

pub use self::exploitable::ExploitableReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Sanitizer,
    Exploitable,
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportKind::Sanitizer => write!(f, "sanitizer"),
            ReportKind::Exploitable => write!(f, "exploitable"),
        }
    }
}

/// At most one report of each [ReportKind] is stored per crash
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Report {
    /// The raw sanitizer report body, without its delimiters
    Sanitizer { text: String },
    Exploitable(ExploitableReport),
}

impl Report {
    pub fn kind(&self) -> ReportKind {
        match self {
            Report::Sanitizer { .. } => ReportKind::Sanitizer,
            Report::Exploitable(_) => ReportKind::Exploitable,
        }
    }

    /// A one line description for progress messages
    pub fn headline(&self) -> String {
        match self {
            Report::Sanitizer { text } => sanitizer::sanitizer_headline_extract(text)
                .map(|san| san.headline())
                .unwrap_or_else(|| "sanitizer report".to_string()),
            Report::Exploitable(r) => r.headline(),
        }
    }

    /// The text placed in a crash summary
    pub fn text(&self) -> String {
        match self {
            Report::Sanitizer { text } => text.clone(),
            Report::Exploitable(r) => r.format_text(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_report_json() {
        let r = Report::Sanitizer {
            text: "==1==ERROR: AddressSanitizer: SEGV on unknown address".into(),
        };

        assert_eq!(r.kind(), ReportKind::Sanitizer);
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            serde_json::json!({
                "kind": "sanitizer",
                "text": "==1==ERROR: AddressSanitizer: SEGV on unknown address",
            })
        );
        assert_eq!(r.headline(), "AddressSanitizer detected SEGV");
    }
}
