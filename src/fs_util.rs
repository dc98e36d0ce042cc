use std::fs;

use camino::Utf8Path;
use tempfile::{Builder, NamedTempFile};

use crate::error::UsiError;

/// Creates a uniquely named file in `dir` that keeps `file_name` as its
/// suffix, so tools that sniff the extension still see `.raw`. The file is
/// removed when the returned handle is dropped.
pub fn download_target(dir: &Utf8Path, file_name: &str) -> Result<NamedTempFile, UsiError> {
    fs::create_dir_all(dir.as_std_path()).map_err(|err| {
        UsiError::Filesystem(format!("create download dir {dir}: {err}"))
    })?;
    let suffix = format!("-{}", sanitize_file_name(file_name));
    Builder::new()
        .prefix("usi-")
        .suffix(&suffix)
        .rand_bytes(12)
        .tempfile_in(dir.as_std_path())
        .map_err(|err| UsiError::Filesystem(err.to_string()))
}

fn sanitize_file_name(file_name: &str) -> String {
    file_name
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' => '_',
            other => other,
        })
        .collect()
}
