use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::ConductorResult;

/// Write `data` to a uniquely named temporary file next to `path` and rename
/// it over `path`, so readers see either the old or the new content
pub async fn write_atomic(path: &Path, data: &[u8]) -> ConductorResult<()> {
    let path: PathBuf = path.to_path_buf();
    let data = data.to_vec();
    tokio::task::spawn_blocking(move || persist_blocking(&path, &data))
        .await
        .map_err(std::io::Error::other)??;
    Ok(())
}

fn persist_blocking(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    // Created with O_EXCL under a random name, so it never clobbers a
    // neighbouring file
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
