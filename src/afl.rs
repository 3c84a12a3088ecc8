// Copyright (c) 2021, Qualcomm Innovation Center, Inc. All rights reserved.
//
// SPDX-License-Identifier: BSD-3-Clause
//! AFL specific handling
use regex::Regex;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Error};
use std::path::Path;
use std::str::FromStr;

lazy_static! {
    static ref R_STATS_LINE: Regex = Regex::new(r"^([^: ]+)[ ]*: (.*)$").unwrap();
}

/// The subset of AFL's `fuzzer_stats` that triage cares about.
/// See AFL's documentation for an explanation of these fields
#[derive(Debug, PartialEq)]
pub struct AflStats {
    pub fuzzer_pid: Option<u64>,
    pub unique_crashes: Option<u64>,
    /// AFL++ 4 name for unique_crashes
    pub saved_crashes: Option<u64>,
    pub afl_banner: Option<String>,
    pub afl_version: Option<String>,
    pub command_line: String,
}

impl AflStats {
    pub fn crash_count(&self) -> Option<u64> {
        self.saved_crashes.or(self.unique_crashes)
    }
}

/// Read and tokenize AFL status from the `fuzzer_stats` file present in AFL directories.
/// Use [validate_afl_fuzzer_stats] to convert tokenized strings into [AflStats].
pub fn parse_afl_fuzzer_stats(filename: &Path) -> Result<HashMap<String, String>, Error> {
    let input = File::open(filename)?;
    let reader = BufReader::new(input);

    let mut kv = HashMap::new();

    for line in reader.lines() {
        let good_line = line?;

        if let Some(caps) = R_STATS_LINE.captures(&good_line) {
            // First occurrence wins
            kv.entry(caps.get(1).unwrap().as_str().to_string())
                .or_insert_with(|| caps.get(2).unwrap().as_str().to_string());
        }
    }

    Ok(kv)
}

#[doc(hidden)]
trait KVConverter {
    fn to_str(&self, key: &str) -> Result<String, String>;
    fn to_num<T: FromStr>(&self, key: &str) -> Result<T, String>;
}

impl<S: std::hash::BuildHasher> KVConverter for HashMap<String, String, S> {
    fn to_str(&self, key: &str) -> Result<String, String> {
        match self.get(key) {
            Some(v) => Ok(v.to_string()),
            None => Err(format!("Missing key {}", key)),
        }
    }

    fn to_num<T: FromStr>(&self, key: &str) -> Result<T, String> {
        match self.to_str(key)?.trim().parse::<T>() {
            Ok(res) => Ok(res),
            Err(_) => Err(format!(
                "Failed to convert {} to number ({})",
                key,
                std::any::type_name::<T>()
            )),
        }
    }
}

/// Validate KV pairs parsed from AFL's `fuzzer_stats` and return [AflStats] on success.
/// Only `command_line` is required, the rest differs between AFL and AFL++ releases and
/// is missing entirely while a fuzzer is still starting up.
pub fn validate_afl_fuzzer_stats<S: std::hash::BuildHasher>(
    kv: &HashMap<String, String, S>,
) -> Result<AflStats, String> {
    Ok(AflStats {
        fuzzer_pid: kv.to_num("fuzzer_pid").ok(),
        unique_crashes: kv.to_num("unique_crashes").ok(),
        saved_crashes: kv.to_num("saved_crashes").ok(),
        afl_banner: kv.to_str("afl_banner").ok(),
        afl_version: kv.to_str("afl_version").ok(),
        command_line: kv.to_str("command_line")?,
    })
}

/// Recover the target invocation from an afl-fuzz `command_line`.
///
/// Everything up to the first `--` belongs to afl-fuzz itself, the rest is the target and
/// its arguments, e.g. `afl-fuzz -i in -o out -- ./harness @@` yields `./harness @@`.
pub fn target_command(command_line: &str) -> Result<String, String> {
    match command_line.split_once("--") {
        Some((_, target)) => {
            let target = target.trim();

            if target.is_empty() {
                Err(format!("Empty target command in '{}'", command_line.trim()))
            } else {
                Ok(target.to_string())
            }
        }
        None => Err(format!(
            "No '--' separator in afl-fuzz command line '{}'",
            command_line.trim()
        )),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    const AFL_NORMAL: &str = "start_time        : 1587489226
last_update       : 1587489253
fuzzer_pid        : 30896
cycles_done       : 0
execs_done        : 8163
unique_crashes    : 3
afl_banner        : harness
afl_version       : 2.57b
target_mode       : default
command_line      : afl-fuzz -i in -o out -M fuzzer01 -- ./harness @@
";

    const AFLPP_NORMAL: &str = "start_time        : 1629734581
fuzzer_pid        : 4125
saved_crashes     : 12
afl_banner        : ./harness
afl_version       : ++4.00c
target_mode       : shmem_testcase default
command_line      : /usr/local/bin/afl-fuzz -i in -o out -- ./harness -d --depth=4
";

    fn stats_file(contents: &str) -> tempfile::NamedTempFile {
        let mut tf = tempfile::NamedTempFile::new().unwrap();
        tf.write_all(contents.as_bytes()).unwrap();
        tf
    }

    #[test]
    fn test_afl_stats() {
        let tf = stats_file(AFL_NORMAL);
        let s = parse_afl_fuzzer_stats(tf.path()).unwrap();
        let s2v = validate_afl_fuzzer_stats(&s).unwrap();

        assert_eq!(s2v.fuzzer_pid, Some(30896));
        assert_eq!(s2v.crash_count(), Some(3));
        assert_eq!(s2v.afl_version.as_deref(), Some("2.57b"));
        assert_eq!(target_command(&s2v.command_line).unwrap(), "./harness @@");

        let tf = stats_file(AFLPP_NORMAL);
        let s = parse_afl_fuzzer_stats(tf.path()).unwrap();
        let s2v = validate_afl_fuzzer_stats(&s).unwrap();

        assert_eq!(s2v.crash_count(), Some(12));
        assert_eq!(
            target_command(&s2v.command_line).unwrap(),
            "./harness -d --depth=4"
        );
    }

    #[test]
    fn test_afl_stats_in_progress() {
        let tf = stats_file("start_time        : 1587489226\nfuzzer_pid        : 1\n");
        let s = parse_afl_fuzzer_stats(tf.path()).unwrap();
        assert!(validate_afl_fuzzer_stats(&s).is_err());

        assert!(parse_afl_fuzzer_stats(Path::new("/nonexistent/fuzzer_stats")).is_err());
    }

    #[test]
    fn test_target_command() {
        assert_eq!(
            target_command("afl-fuzz -i a -o b --   ./bin --flag @@  ").unwrap(),
            "./bin --flag @@"
        );
        assert!(target_command("afl-fuzz -i a -o b ./bin @@").is_err());
        assert!(target_command("afl-fuzz -i a -o b --  ").is_err());
    }
}
