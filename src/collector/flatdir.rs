// Copyright (c) 2021, Qualcomm Innovation Center, Inc. All rights reserved.
//
// SPDX-License-Identifier: BSD-3-Clause
//! A directory where every entry is a crash input
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::{canonical_root, CollectError, CollectResult, Collector};
use crate::util::list_sorted_files_at;

pub const COLLECTOR_NAME: &str = "flat-dir-collector";

#[derive(Debug, Default)]
pub struct FlatDirCollector;

impl Collector for FlatDirCollector {
    fn name(&self) -> &'static str {
        COLLECTOR_NAME
    }

    fn discover_command(&self, _directory: &Path) -> CollectResult<Option<String>> {
        Ok(None)
    }

    fn discover_inputs(&self, directory: &Path) -> CollectResult<BTreeSet<PathBuf>> {
        let root = canonical_root(directory)?;

        log::info!("Reading {}...", root.display());

        Ok(list_sorted_files_at(&root)
            .map_err(|e| CollectError::io(&root, e))?
            .into_iter()
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    #[test]
    fn test_flat_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();

        fs::write(root.join("crash-1"), b"A").unwrap();
        fs::write(root.join("crash-2"), b"B").unwrap();

        let crashes = FlatDirCollector.discover_inputs(dir.path()).unwrap();
        assert_eq!(
            crashes.into_iter().collect::<Vec<_>>(),
            vec![root.join("crash-1"), root.join("crash-2")]
        );

        assert_eq!(FlatDirCollector.discover_command(dir.path()).unwrap(), None);

        match FlatDirCollector.discover_all_samples(dir.path()) {
            Err(CollectError::Unsupported { collector, .. }) => {
                assert_eq!(collector, COLLECTOR_NAME)
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
