//! Per-destination serialization for stage transitions.
//!
//! Each transition holds an exclusive `fs2` advisory lock on a file named
//! after the SHA-256 of its normalized destination path. The lock is taken
//! before the existence and collision checks, so two callers aiming at the
//! same destination run one after the other, both across processes and
//! across threads of one process (each guard opens its own file handle).

use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::path::Path;

use crate::error::{StageError, StageResult};
use crate::pipeline::util::normalize_path;

#[derive(Debug)]
pub struct DestinationLock {
    file: File,
}

pub fn lock_key(destination: &Path) -> String {
    let normalized = normalize_path(destination);
    let mut hasher = Sha256::new();
    hasher.update(normalized.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}

impl DestinationLock {
    /// Block until the destination is free, then hold it until drop.
    pub fn acquire(locks_dir: &Path, destination: &Path) -> StageResult<Self> {
        fs::create_dir_all(locks_dir)
            .map_err(|err| StageError::transition("create lock dir", locks_dir, err))?;
        let lock_path = locks_dir.join(format!("{}.lock", lock_key(destination)));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|err| StageError::transition("open lock", &lock_path, err))?;
        file.lock_exclusive()
            .map_err(|err| StageError::transition("acquire lock", &lock_path, err))?;

        Ok(Self { file })
    }
}

impl Drop for DestinationLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn equivalent_spellings_share_a_key() {
        let a = lock_key(Path::new("/data/03_Processing/P1"));
        let b = lock_key(Path::new("/data/02_Archive/../03_Processing/./P1"));
        let c = lock_key(Path::new("/data/03_Processing/P2"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn holders_of_one_destination_never_overlap() {
        let tmp = tempdir().expect("tempdir");
        let locks = Arc::new(tmp.path().join("locks"));
        let dest = Arc::new(tmp.path().join("03_Processing/P1"));
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let handles = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let dest = Arc::clone(&dest);
                let inside = Arc::clone(&inside);
                let overlaps = Arc::clone(&overlaps);
                thread::spawn(move || {
                    let _guard = DestinationLock::acquire(&locks, &dest).expect("lock");
                    if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(20));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().expect("join");
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }
}
