// Copyright (c) 2021, Qualcomm Innovation Center, Inc. All rights reserved.
//
// SPDX-License-Identifier: BSD-3-Clause
//! Utilities
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// The conventional token marking where the crash input path goes in a command template
pub const FILE_PLACEHOLDER: &str = "@@";

pub fn elide_size(s: &str, size: usize) -> String {
    let pos = s.char_indices().map(|(byte_offset, _)| byte_offset).nth(size);

    if let Some(offset) = pos {
        format!("{}...", &s[..offset])
    } else {
        s.to_string()
    }
}

pub fn isatty() -> bool {
    unsafe { libc::isatty(libc::STDOUT_FILENO) != 0 }
}

pub fn list_sorted_files_at(path: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = fs::read_dir(path)?
        .map(|res| res.map(|e| e.path()))
        .collect::<Result<Vec<_>, io::Error>>()?;

    files.sort();
    Ok(files)
}

/// Position of the first argument that is exactly the file placeholder
pub fn find_placeholder<S: AsRef<str>>(args: &[S]) -> Option<usize> {
    args.iter().position(|arg| arg.as_ref() == FILE_PLACEHOLDER)
}

/// The type signature for shlex::join is very restrictive.
/// Wrap it with a friendlier generic function
pub fn shell_join<'a, I, S>(args: I) -> String
where
    I: IntoIterator<Item = &'a S>,
    S: AsRef<str> + 'a,
{
    shlex::join(args.into_iter().map(|x| x.as_ref()).collect::<Vec<&str>>())
}

/// Express `path` relative to `base`. Both should be absolute and free of `.`/`..` (i.e.
/// canonicalized), otherwise the result is only lexically correct.
pub fn relative_path(base: &Path, path: &Path) -> PathBuf {
    let base_parts: Vec<Component> = base.components().collect();
    let path_parts: Vec<Component> = path.components().collect();

    let common = base_parts
        .iter()
        .zip(path_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();

    for _ in common..base_parts.len() {
        rel.push("..");
    }

    for part in &path_parts[common..] {
        rel.push(part.as_os_str());
    }

    if rel.as_os_str().is_empty() {
        rel.push(".");
    }

    rel
}

/// Copy each file into `out`, creating it first. Returns the files that failed to copy.
pub fn copy_files_to<'a, I>(files: I, out: &Path) -> io::Result<Vec<(PathBuf, io::Error)>>
where
    I: IntoIterator<Item = &'a Path>,
{
    fs::create_dir_all(out)?;

    let mut failed = vec![];

    for file in files {
        let name = match file.file_name() {
            Some(name) => name,
            None => continue,
        };

        if let Err(e) = fs::copy(file, out.join(name)) {
            failed.push((file.to_path_buf(), e));
        }
    }

    Ok(failed)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_elide_size() {
        assert_eq!(elide_size("привет", 1), "п...");
        assert_eq!(elide_size("привет", 6), "привет");
    }

    #[test]
    fn test_placeholder() {
        let args = ["./harness", "-f", "@@", "@@"];
        assert_eq!(find_placeholder(&args), Some(2));
        assert_eq!(find_placeholder(&["./harness", "--in=@@"]), None);
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("/a/b"), Path::new("/a/b/out/crashes/id0")),
            PathBuf::from("out/crashes/id0")
        );
        assert_eq!(
            relative_path(Path::new("/a/b"), Path::new("/a/c/id0")),
            PathBuf::from("../c/id0")
        );
        assert_eq!(relative_path(Path::new("/a"), Path::new("/a")), PathBuf::from("."));
        assert_eq!(
            Path::new("/a/b").join(relative_path(Path::new("/a/b"), Path::new("/x/y"))),
            PathBuf::from("/a/b/../../x/y")
        );
    }

    #[test]
    fn test_copy_files_to() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let present = src.path().join("id:000000");
        let missing = src.path().join("id:000001");
        fs::write(&present, b"AAAA").unwrap();

        let out = dst.path().join("gathered");
        let failed = copy_files_to(vec![present.as_path(), missing.as_path()], &out).unwrap();

        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, missing);
        assert_eq!(fs::read(out.join("id:000000")).unwrap(), b"AAAA");
    }
}
