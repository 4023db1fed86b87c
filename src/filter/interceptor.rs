//! Operation interceptor
//!
//! Observes open-completion, pre-write, and cleanup events delivered by the
//! surrounding host and drives context attachment and the exactly-once
//! backup. No error here is ever propagated to fail the observed operation;
//! protection is best-effort and the underlying I/O always proceeds.

use crate::classify::PathClassifier;
use crate::filter::backup::{BackupEngine, BackupOutcome};
use crate::filter::context::FileContext;
use crate::filter::store::{AttachOutcome, ContextStore, FileObjectId};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Trust level of the actor behind an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    /// Internal or system-originated request; never protected
    Trusted,
    /// Ordinary client request
    Untrusted,
}

/// Whether an open found an existing file or created a new one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenDisposition {
    /// An existing file was opened
    Opened,
    /// The open brought the file into existence
    Created,
}

/// How the host should proceed after a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Let the operation continue; the session may be protected
    Allow,
    /// Let the operation continue and skip further callbacks for this
    /// session; no context is attached
    AllowIgnoreSession,
}

/// A completed open/create operation
#[derive(Debug, Clone)]
pub struct OpenEvent {
    /// Session identity the host will use for later writes and cleanup
    pub file_id: FileObjectId,
    /// Canonical path of the opened file
    pub path: PathBuf,
    /// Alternate stream name; `None` or empty means the primary data stream
    pub stream: Option<String>,
    /// POSIX open flags as requested by the caller
    pub flags: i32,
    /// Whether the file existed before this open
    pub disposition: OpenDisposition,
    /// Trust level of the requester
    pub origin: RequestOrigin,
    /// The host is tearing down and draining callbacks
    pub draining: bool,
    /// The target is already pending deletion
    pub delete_pending: bool,
}

impl OpenEvent {
    /// Whether the caller requested data-write access
    pub fn wants_write(&self) -> bool {
        (self.flags & libc::O_ACCMODE) != libc::O_RDONLY
    }
}

/// An in-flight write operation
#[derive(Debug, Clone, Copy)]
pub struct WriteEvent {
    pub file_id: FileObjectId,
    pub offset: i64,
    pub len: usize,
}

/// The final close of a session
#[derive(Debug, Clone, Copy)]
pub struct CleanupEvent {
    pub file_id: FileObjectId,
}

/// Callback dispatcher and top-level controller of the protection filter.
///
/// Owns the classifier, the backup engine, and the context store. Created
/// at host startup; `shutdown` drains whatever sessions remain.
pub struct Interceptor {
    classifier: PathClassifier,
    engine: BackupEngine,
    store: ContextStore,
}

impl Interceptor {
    pub fn new(classifier: PathClassifier, engine: BackupEngine) -> Self {
        Interceptor {
            classifier,
            engine,
            store: ContextStore::new(),
        }
    }

    /// Number of sessions currently under protection
    pub fn active_sessions(&self) -> usize {
        self.store.len()
    }

    /// Context store access for the host and for tests
    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    /// Handle a completed open.
    ///
    /// Attaches a context when every guard passes: the operation is not
    /// draining, the target is not pending deletion, the caller is untrusted
    /// and asked for write access, the file existed before the open, the
    /// primary data stream is the target, and the parent directory is
    /// protected. Any failure to attach leaves the open unaffected.
    pub fn on_open_completed(&self, event: &OpenEvent) -> Disposition {
        if event.draining || event.delete_pending {
            return Disposition::AllowIgnoreSession;
        }

        if event.origin == RequestOrigin::Trusted
            || !event.wants_write()
            || event.disposition == OpenDisposition::Created
        {
            return Disposition::AllowIgnoreSession;
        }

        if event.stream.as_deref().is_some_and(|s| !s.is_empty()) {
            debug!(path = %event.path.display(), "alternate stream, not protecting");
            return Disposition::AllowIgnoreSession;
        }

        let Some(parent) = event.path.parent() else {
            return Disposition::AllowIgnoreSession;
        };
        if !self.classifier.is_protected(parent) {
            return Disposition::AllowIgnoreSession;
        }

        let context = Arc::new(FileContext::new(event.path.clone()));
        match self.store.attach_if_absent(event.file_id, context) {
            AttachOutcome::Attached => {
                info!(
                    file_id = event.file_id,
                    path = %event.path.display(),
                    "protection attached"
                );
            }
            AttachOutcome::KeptExisting => {
                debug!(
                    file_id = event.file_id,
                    "context already attached, keeping existing"
                );
            }
        }

        Disposition::Allow
    }

    /// Handle an impending write.
    ///
    /// On the session's first write the original is preserved under the
    /// session guard; the flag is set whether or not the backup succeeded,
    /// so a failing session is not retried on every subsequent write. The
    /// write itself is never blocked.
    pub fn on_pre_write(&self, event: &WriteEvent) -> Disposition {
        let Some(context) = self.store.lookup(event.file_id) else {
            return Disposition::AllowIgnoreSession;
        };

        let mut backup_done = context.lock_session();
        if !*backup_done {
            match self.engine.preserve_original(context.path()) {
                Ok(BackupOutcome::Copied { bytes }) => {
                    info!(
                        file_id = event.file_id,
                        path = %context.path().display(),
                        bytes,
                        "original preserved before first write"
                    );
                }
                Ok(BackupOutcome::EmptySource) => {
                    debug!(
                        file_id = event.file_id,
                        path = %context.path().display(),
                        "empty original, no shadow written"
                    );
                }
                Err(e) => {
                    warn!(
                        file_id = event.file_id,
                        path = %context.path().display(),
                        error = %e,
                        "backup failed; session will not retry"
                    );
                }
            }
            *backup_done = true;
        }

        Disposition::Allow
    }

    /// Handle the final close of a session, detaching its context
    pub fn on_cleanup(&self, event: &CleanupEvent) -> Disposition {
        if let Some(context) = self.store.detach(event.file_id) {
            debug!(
                file_id = event.file_id,
                path = %context.path().display(),
                "context detached"
            );
        }
        Disposition::Allow
    }

    /// Tear down, dropping every remaining context.
    ///
    /// Sessions still attached at this point had no cleanup event; they are
    /// logged and released.
    pub fn shutdown(&self) {
        for (file_id, context) in self.store.drain() {
            warn!(
                file_id,
                path = %context.path().display(),
                "context still attached at shutdown"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackupConfig, ProtectConfig};
    use std::fs;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    fn interceptor() -> Interceptor {
        Interceptor::new(
            PathClassifier::new(&ProtectConfig::default()),
            BackupEngine::new(&BackupConfig::default()),
        )
    }

    fn open_event(file_id: FileObjectId, path: &Path) -> OpenEvent {
        OpenEvent {
            file_id,
            path: path.to_path_buf(),
            stream: None,
            flags: libc::O_WRONLY,
            disposition: OpenDisposition::Opened,
            origin: RequestOrigin::Untrusted,
            draining: false,
            delete_pending: false,
        }
    }

    fn write_event(file_id: FileObjectId) -> WriteEvent {
        WriteEvent {
            file_id,
            offset: 0,
            len: 4096,
        }
    }

    /// Temp dir with a protected subdirectory holding one file
    fn protected_file(content: &[u8]) -> (TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let secret = dir.path().join("secret");
        fs::create_dir(&secret).unwrap();
        let file = secret.join("report.txt");
        fs::write(&file, content).unwrap();
        (dir, file)
    }

    #[test]
    fn test_guards_reject_non_qualifying_opens() {
        let dir = tempdir().unwrap();
        let secret = dir.path().join("secret");
        fs::create_dir(&secret).unwrap();
        let path = secret.join("report.txt");
        fs::write(&path, b"data").unwrap();

        let filter = interceptor();

        let draining = OpenEvent {
            draining: true,
            ..open_event(1, &path)
        };
        assert_eq!(
            filter.on_open_completed(&draining),
            Disposition::AllowIgnoreSession
        );

        let delete_pending = OpenEvent {
            delete_pending: true,
            ..open_event(2, &path)
        };
        assert_eq!(
            filter.on_open_completed(&delete_pending),
            Disposition::AllowIgnoreSession
        );

        let trusted = OpenEvent {
            origin: RequestOrigin::Trusted,
            ..open_event(3, &path)
        };
        assert_eq!(
            filter.on_open_completed(&trusted),
            Disposition::AllowIgnoreSession
        );

        let read_only = OpenEvent {
            flags: libc::O_RDONLY,
            ..open_event(4, &path)
        };
        assert_eq!(
            filter.on_open_completed(&read_only),
            Disposition::AllowIgnoreSession
        );

        let created = OpenEvent {
            disposition: OpenDisposition::Created,
            ..open_event(5, &path)
        };
        assert_eq!(
            filter.on_open_completed(&created),
            Disposition::AllowIgnoreSession
        );

        let stream = OpenEvent {
            stream: Some("metadata".to_string()),
            ..open_event(6, &path)
        };
        assert_eq!(
            filter.on_open_completed(&stream),
            Disposition::AllowIgnoreSession
        );

        let unprotected = dir.path().join("public").join("report.txt");
        assert_eq!(
            filter.on_open_completed(&open_event(7, &unprotected)),
            Disposition::AllowIgnoreSession
        );

        assert_eq!(filter.active_sessions(), 0);
    }

    #[test]
    fn test_qualifying_open_attaches_context() {
        let (_dir, path) = protected_file(b"data");
        let filter = interceptor();

        assert_eq!(
            filter.on_open_completed(&open_event(1, &path)),
            Disposition::Allow
        );
        assert_eq!(filter.active_sessions(), 1);

        let context = filter.store().lookup(1).unwrap();
        assert_eq!(context.path(), path.as_path());
        assert!(!context.backup_performed());
    }

    #[test]
    fn test_first_write_preserves_original() {
        let content = b"original confidential content".repeat(16);
        let (_dir, path) = protected_file(&content);
        let filter = interceptor();

        filter.on_open_completed(&open_event(1, &path));
        assert_eq!(filter.on_pre_write(&write_event(1)), Disposition::Allow);

        let shadow = path.with_extension("txt.bak");
        assert_eq!(fs::read(&shadow).unwrap(), content);
        assert!(!path.exists());
        assert!(filter.store().lookup(1).unwrap().backup_performed());
    }

    #[test]
    fn test_second_write_does_not_rerun_backup() {
        let (_dir, path) = protected_file(b"first content");
        let filter = interceptor();

        filter.on_open_completed(&open_event(1, &path));
        filter.on_pre_write(&write_event(1));

        // Recreate the name with new content; a second backup would clobber
        // the shadow with it
        fs::write(&path, b"attacker content").unwrap();
        filter.on_pre_write(&write_event(1));
        filter.on_pre_write(&write_event(1));

        let shadow = path.with_extension("txt.bak");
        assert_eq!(fs::read(&shadow).unwrap(), b"first content");
        assert!(path.exists());
    }

    #[test]
    fn test_concurrent_writes_back_up_at_most_once() {
        let content = b"racy content".repeat(1024);
        let (_dir, path) = protected_file(&content);
        let filter = std::sync::Arc::new(interceptor());

        filter.on_open_completed(&open_event(1, &path));

        let mut threads = Vec::new();
        for _ in 0..8 {
            let filter = std::sync::Arc::clone(&filter);
            threads.push(std::thread::spawn(move || {
                filter.on_pre_write(&write_event(1));
            }));
        }
        for thread in threads {
            thread.join().unwrap();
        }

        let shadow = path.with_extension("txt.bak");
        assert_eq!(fs::read(&shadow).unwrap(), content);
        assert!(!path.exists());
        assert!(filter.store().lookup(1).unwrap().backup_performed());
    }

    #[test]
    fn test_empty_file_produces_no_shadow() {
        let (_dir, path) = protected_file(b"");
        let filter = interceptor();

        filter.on_open_completed(&open_event(1, &path));
        filter.on_pre_write(&write_event(1));

        assert!(!path.with_extension("txt.bak").exists());
        assert!(path.exists());
        // Flag still set: an empty session is done, not retried
        assert!(filter.store().lookup(1).unwrap().backup_performed());
    }

    #[test]
    fn test_write_without_context_is_untouched() {
        let filter = interceptor();
        assert_eq!(
            filter.on_pre_write(&write_event(42)),
            Disposition::AllowIgnoreSession
        );
    }

    #[test]
    fn test_failed_backup_is_not_retried() {
        let (_dir, path) = protected_file(b"going away");
        let filter = interceptor();

        filter.on_open_completed(&open_event(1, &path));

        // Remove the file before the first write so the backup fails
        fs::remove_file(&path).unwrap();
        filter.on_pre_write(&write_event(1));

        let context = filter.store().lookup(1).unwrap();
        assert!(context.backup_performed());

        // Recreate the file; a retry would now succeed and delete it again
        fs::write(&path, b"back").unwrap();
        filter.on_pre_write(&write_event(1));
        assert!(path.exists());
        assert!(!path.with_extension("txt.bak").exists());
    }

    #[test]
    fn test_cleanup_detaches_and_session_rearms() {
        let (_dir, path) = protected_file(b"cycle one");
        let filter = interceptor();

        filter.on_open_completed(&open_event(1, &path));
        filter.on_pre_write(&write_event(1));
        filter.on_cleanup(&CleanupEvent { file_id: 1 });
        assert_eq!(filter.active_sessions(), 0);

        // A fresh session on the recreated path runs a new backup cycle,
        // overwriting the prior shadow
        fs::write(&path, b"cycle two").unwrap();
        filter.on_open_completed(&open_event(2, &path));
        filter.on_pre_write(&write_event(2));

        let shadow = path.with_extension("txt.bak");
        assert_eq!(fs::read(&shadow).unwrap(), b"cycle two");

        filter.on_cleanup(&CleanupEvent { file_id: 2 });
        assert_eq!(filter.active_sessions(), 0);
    }

    #[test]
    fn test_shutdown_drains_remaining_sessions() {
        let (_dir, path) = protected_file(b"left open");
        let filter = interceptor();

        filter.on_open_completed(&open_event(1, &path));
        assert_eq!(filter.active_sessions(), 1);

        filter.shutdown();
        assert_eq!(filter.active_sessions(), 0);
    }
}
