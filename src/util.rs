//! Small filesystem helpers shared by the store and the exporters.

use crate::error::PipelineError;
use std::fs;
use std::path::{Path, PathBuf};

/// Creates the parent directory of `file_path` if it does not exist yet.
pub fn ensure_parent_dir(file_path: impl AsRef<Path>) -> Result<(), PipelineError> {
    if let Some(parent) = file_path.as_ref().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Runs `write` against a sibling temp file, then renames it over `path`, so
/// readers only ever see the old file or the complete new one.
pub fn write_atomically(
    path: &Path,
    write: impl FnOnce(&mut fs::File) -> Result<(), PipelineError>,
) -> Result<(), PipelineError> {
    ensure_parent_dir(path)?;
    let tmp = tmp_path(path);
    let result = (|| -> Result<(), PipelineError> {
        let mut file = fs::File::create(&tmp)?;
        write(&mut file)?;
        file.sync_all()?;
        Ok(())
    })();
    match result {
        Ok(()) => {
            fs::rename(&tmp, path)?;
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
