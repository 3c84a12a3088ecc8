// Copyright (c) 2021, Qualcomm Innovation Center, Inc. All rights reserved.
//
// SPDX-License-Identifier: BSD-3-Clause
//! AFL / AFL++ output directories
//!
//! `afl-fuzz -o out` produces one of two layouts. A lone fuzzer writes `fuzzer_stats`,
//! `crashes/` and `queue/` directly into `out`. Parallel fuzzers (`-M`/`-S`) each get a
//! worker directory `out/<name>/` with the same contents. The single layout is detected
//! first by looking for `fuzzer_stats` at the root.
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::{canonical_root, CollectError, CollectResult, Collector};
use crate::afl::{parse_afl_fuzzer_stats, target_command, validate_afl_fuzzer_stats};
use crate::util::list_sorted_files_at;

pub const COLLECTOR_NAME: &str = "afl-collector";

/// AFL writes this into every crash directory to explain how to report bugs
const README_NAME: &str = "README.txt";
/// Left behind by crashwalk's `-tidy` option. Holds crash inputs moved out of `crashes/`
const CRASHWALK_TIDY_DIR: &str = ".cwtidy";

#[derive(Debug, Default)]
pub struct AflCollector;

impl AflCollector {
    fn fuzzer_dirs(&self, root: &Path) -> CollectResult<Vec<PathBuf>> {
        if root.join("fuzzer_stats").exists() {
            Ok(vec![root.to_path_buf()])
        } else {
            list_sorted_files_at(root).map_err(|e| CollectError::io(root, e))
        }
    }

    fn read_crash_dir(&self, crash_dir: &Path, crashes: &mut BTreeSet<PathBuf>) -> CollectResult<()> {
        for crash in list_sorted_files_at(crash_dir).map_err(|e| CollectError::io(crash_dir, e))? {
            let name = crash.file_name().map(|n| n.to_string_lossy().to_string());

            match name.as_deref() {
                Some(README_NAME) => continue,
                Some(CRASHWALK_TIDY_DIR) if crash.is_dir() => {
                    // a container, not an input
                    for tidied in list_sorted_files_at(&crash).map_err(|e| CollectError::io(&crash, e))? {
                        if tidied.file_name().map_or(false, |n| n == README_NAME) {
                            continue;
                        }
                        crashes.insert(tidied);
                    }
                }
                _ => {
                    crashes.insert(crash);
                }
            }
        }

        Ok(())
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

impl Collector for AflCollector {
    fn name(&self) -> &'static str {
        COLLECTOR_NAME
    }

    fn discover_command(&self, directory: &Path) -> CollectResult<Option<String>> {
        let root = canonical_root(directory)?;

        for fuzzer_dir in self.fuzzer_dirs(&root)? {
            let stats_file = fuzzer_dir.join("fuzzer_stats");

            let kv = match parse_afl_fuzzer_stats(&stats_file) {
                Ok(kv) => kv,
                Err(_) => continue,
            };

            let stats = match validate_afl_fuzzer_stats(&kv) {
                Ok(stats) => stats,
                Err(e) => {
                    log::warn!("Ignoring {}: {}", stats_file.display(), e);
                    continue;
                }
            };

            if let Some(version) = &stats.afl_version {
                log::debug!("{} was fuzzed by AFL {}", dir_name(&fuzzer_dir), version);
            }
            if let Some(count) = stats.crash_count() {
                log::debug!("{} reports {} saved crashes", dir_name(&fuzzer_dir), count);
            }

            let command = target_command(&stats.command_line).map_err(CollectError::Discovery)?;
            log::info!("afl-fuzz command: {}", command);

            return Ok(Some(command));
        }

        Err(CollectError::Discovery(format!(
            "No fuzzer_stats with a command_line found under {}",
            root.display()
        )))
    }

    fn discover_inputs(&self, directory: &Path) -> CollectResult<BTreeSet<PathBuf>> {
        let root = canonical_root(directory)?;
        let mut crashes = BTreeSet::new();

        log::info!("Reading {}...", root.display());

        for fuzzer_dir in self.fuzzer_dirs(&root)? {
            let crash_dir = fuzzer_dir.join("crashes");

            if !crash_dir.is_dir() {
                log::info!("Skipping fuzzer {}...", dir_name(&fuzzer_dir));
                continue;
            }

            log::info!("Parsing fuzzer {}...", dir_name(&fuzzer_dir));
            self.read_crash_dir(&crash_dir, &mut crashes)?;
        }

        Ok(crashes)
    }

    fn discover_all_samples(&self, directory: &Path) -> CollectResult<BTreeSet<PathBuf>> {
        let root = canonical_root(directory)?;
        let mut samples = BTreeSet::new();

        log::info!("Reading {}...", root.display());

        for fuzzer_dir in self.fuzzer_dirs(&root)? {
            let queue_dir = fuzzer_dir.join("queue");

            if !queue_dir.is_dir() {
                log::info!("Skipping fuzzer {}...", dir_name(&fuzzer_dir));
                continue;
            }

            log::info!("Parsing fuzzer {}...", dir_name(&fuzzer_dir));

            for sample in list_sorted_files_at(&queue_dir).map_err(|e| CollectError::io(&queue_dir, e))? {
                // .state and friends
                if sample.is_dir() || sample.file_name().map_or(false, |n| n == README_NAME) {
                    continue;
                }
                samples.insert(sample);
            }
        }

        Ok(samples)
    }
}
