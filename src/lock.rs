//! Filesystem lock that keeps crawl runs from overlapping.
//!
//! The lock is a file created with `create_new`, so the existence check and the
//! acquisition are one atomic step. Its content is the owning process id, for
//! humans only; nobody verifies it. The file is removed when the guard drops,
//! which covers early returns, errors, and panics unwinding through a run.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Try to take the lock at `path`.
    ///
    /// Returns `Ok(None)` when another run already holds it.
    pub fn acquire(path: &Path) -> io::Result<Option<RunLock>> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let owner = fs::read_to_string(path).unwrap_or_default();
                debug!(path = %path.display(), owner = %owner.trim(), "Lock already held");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let lock = RunLock {
            path: path.to_path_buf(),
        };
        // From here on the guard owns the file, so a failed write still removes it.
        write!(file, "{}", std::process::id())?;
        debug!(path = %path.display(), "Lock acquired");
        Ok(Some(lock))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Lock released"),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "Lock file vanished before release")
            }
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove lock file"),
        }
    }
}
