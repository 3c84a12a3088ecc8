// Copyright (c) 2021, Qualcomm Innovation Center, Inc. All rights reserved.
//
// SPDX-License-Identifier: BSD-3-Clause
//! Crash discovery
//!
//! A [Collector] knows how a particular fuzzer lays out its output directory. It turns that
//! directory into a flat set of absolute crash input paths and, when the layout records it,
//! the command line the fuzzer used to drive the target. Collectors never touch the crash
//! store; deduplication against earlier runs happens in [crate::store::CrashStore::save_new].
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod afl;
pub mod flatdir;

pub use self::afl::AflCollector;
pub use self::flatdir::FlatDirCollector;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("Discovery failed: {0}")]
    Discovery(String),
    #[error("{collector} does not support {operation}")]
    Unsupported {
        collector: &'static str,
        operation: &'static str,
    },
    #[error("I/O error while reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CollectError {
    pub(crate) fn io(path: &Path, source: io::Error) -> CollectError {
        CollectError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type CollectResult<T> = Result<T, CollectError>;

/// A fuzzer output layout
pub trait Collector {
    /// Stable identifier persisted in the crash store metadata
    fn name(&self) -> &'static str;

    /// The target invocation template used by the fuzzer, if the layout records one
    fn discover_command(&self, directory: &Path) -> CollectResult<Option<String>>;

    /// Every crash input currently present under `directory`
    fn discover_inputs(&self, directory: &Path) -> CollectResult<BTreeSet<PathBuf>>;

    /// Every input the fuzzer generated, crashing or not
    fn discover_all_samples(&self, _directory: &Path) -> CollectResult<BTreeSet<PathBuf>> {
        Err(CollectError::Unsupported {
            collector: self.name(),
            operation: "gathering all samples",
        })
    }
}

arg_enum! {
    #[derive(PartialEq, Debug, Clone, Copy)]
    #[allow(non_camel_case_types)]
    pub enum CollectorKind {
        afl,
        flatdir
    }
}

impl CollectorKind {
    pub fn build(self) -> Box<dyn Collector> {
        match self {
            CollectorKind::afl => Box::new(AflCollector),
            CollectorKind::flatdir => Box::new(FlatDirCollector),
        }
    }

    /// Map a persisted [Collector::name] back to its kind
    pub fn from_collector_name(name: &str) -> Option<CollectorKind> {
        match name {
            afl::COLLECTOR_NAME => Some(CollectorKind::afl),
            flatdir::COLLECTOR_NAME => Some(CollectorKind::flatdir),
            _ => None,
        }
    }
}

/// Canonicalize a collector root so every discovered path is absolute
pub(crate) fn canonical_root(directory: &Path) -> CollectResult<PathBuf> {
    directory
        .canonicalize()
        .map_err(|e| CollectError::io(directory, e))
}
