// Copyright (c) 2021, Qualcomm Innovation Center, Inc. All rights reserved.
//
// SPDX-License-Identifier: BSD-3-Clause
//! atriage environment variables
//!
//! * `ATRIAGE_DB` - Location of the crash store. [default: atriage.db]
//! * `ATRIAGE_GDB_PATH` - Set the path to GDB. [default: gdb]
//! * `ATRIAGE_EXPLOITABLE_SCRIPT` - Path to the CERT `exploitable` GDB plugin script.
use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

pub const DEFAULT_DB_FILE_NAME: &str = "atriage.db";

#[derive(Debug, PartialEq)]
pub struct AtriageEnv {
    pub db_path: PathBuf,
    pub gdb_path: String,
    pub exploitable_script: Option<PathBuf>,
}

impl Default for AtriageEnv {
    fn default() -> Self {
        AtriageEnv {
            db_path: PathBuf::from(DEFAULT_DB_FILE_NAME),
            gdb_path: "gdb".into(),
            exploitable_script: None,
        }
    }
}

pub fn parse_atriage_env() -> AtriageEnv {
    parse_atriage_env_from(env::vars_os())
}

fn parse_atriage_env_from<I>(vars: I) -> AtriageEnv
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut aenv: AtriageEnv = Default::default();

    for (key, value) in vars {
        let key = key.to_string_lossy();

        if key == "ATRIAGE_DB" {
            aenv.db_path = PathBuf::from(value);
        } else if key == "ATRIAGE_GDB_PATH" {
            aenv.gdb_path = value.to_string_lossy().to_string();
        } else if key == "ATRIAGE_EXPLOITABLE_SCRIPT" {
            aenv.exploitable_script = Some(PathBuf::from(value));
        } else if key.starts_with("ATRIAGE_") {
            log::warn!("Potentially misspelled environment variable {}", key);
        }
    }

    aenv
}
