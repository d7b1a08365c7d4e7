use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static SNAPSHOT_COUNTER: AtomicU64 = AtomicU64::new(0);
pub(crate) const SNAPSHOT_TEMP_PREFIX: &str = ".trees-snapshot.";

/// Replaces `path` with `bytes` via a synced sibling temp file, so readers see
/// either the previous snapshot or the new one.
pub(crate) fn replace_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        Some(_) => Path::new("."),
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("snapshot path `{}` has no parent directory", path.display()),
            ));
        }
    };
    fs::create_dir_all(dir)?;

    let staged = staging_path(dir, path)?;
    let result = write_staged(&staged, bytes).and_then(|()| {
        fs::rename(&staged, path)?;
        sync_dir(dir)
    });
    if result.is_err() {
        let _ = fs::remove_file(&staged);
    }
    result
}

fn write_staged(staged: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(staged)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn staging_path(dir: &Path, target: &Path) -> io::Result<PathBuf> {
    let name = target
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid snapshot filename"))?;
    let sequence = SNAPSHOT_COUNTER.fetch_add(1, Ordering::Relaxed);
    Ok(dir.join(format!(
        "{SNAPSHOT_TEMP_PREFIX}{name}.{}.{sequence}",
        std::process::id()
    )))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
