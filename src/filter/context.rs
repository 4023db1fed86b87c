//! Per-session file context

use parking_lot::{Mutex, MutexGuard};
use std::path::{Path, PathBuf};

/// Metadata attached to one open session of a protected file.
///
/// The path is written once at creation and only read afterwards. The
/// backup flag is the only field mutated after creation and is only ever
/// touched through the embedded lock, which serializes the whole
/// check-then-backup sequence across concurrent writers.
pub struct FileContext {
    /// Fully-qualified path at the time the context was created
    path: PathBuf,
    /// Whether a backup has already been attempted for this session
    backup_done: Mutex<bool>,
}

impl FileContext {
    /// Create a context for a freshly opened protected file
    pub fn new(path: PathBuf) -> Self {
        FileContext {
            path,
            backup_done: Mutex::new(false),
        }
    }

    /// Path of the protected file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the session guard, yielding the backup flag.
    ///
    /// Holders must set the flag to true after a backup attempt, whether it
    /// succeeded or not.
    pub fn lock_session(&self) -> MutexGuard<'_, bool> {
        self.backup_done.lock()
    }

    /// Whether a backup has been attempted for this session
    pub fn backup_performed(&self) -> bool {
        *self.backup_done.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_transitions_once() {
        let context = FileContext::new(PathBuf::from("/data/secret/report.txt"));
        assert!(!context.backup_performed());

        {
            let mut done = context.lock_session();
            assert!(!*done);
            *done = true;
        }

        assert!(context.backup_performed());
        assert_eq!(context.path(), Path::new("/data/secret/report.txt"));
    }
}
