//! Backup engine: copy-and-replace preservation of original content
//!
//! Copies the full current content of a file to a sibling shadow file, sets
//! the shadow to the observed length, then unlinks the original so the
//! impending write proceeds against a clean name. The engine re-opens the
//! target by path; on POSIX this succeeds regardless of the caller's own
//! open descriptor, and the nested I/O goes straight to the filesystem, so
//! it cannot re-enter the interception logic.

use crate::config::BackupConfig;
use crate::error::Result;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Result of a successful preservation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupOutcome {
    /// Content was copied to the shadow file and the original was unlinked
    Copied {
        /// Bytes transferred
        bytes: u64,
    },
    /// The original was empty; no shadow was produced
    EmptySource,
}

/// Copies protected files to their shadow location before first write
#[derive(Debug, Clone)]
pub struct BackupEngine {
    suffix: OsString,
    chunk_size: usize,
}

impl BackupEngine {
    pub fn new(config: &BackupConfig) -> Self {
        BackupEngine {
            suffix: OsString::from(&config.suffix),
            chunk_size: config.chunk_size,
        }
    }

    /// Shadow location for an original path: the same name with the
    /// configured suffix appended.
    pub fn shadow_path(&self, path: &Path) -> PathBuf {
        let mut shadow = path.as_os_str().to_os_string();
        shadow.push(&self.suffix);
        PathBuf::from(shadow)
    }

    /// Preserve the current content of `path` into its shadow file, then
    /// unlink the original.
    ///
    /// Any step failure aborts the remainder and surfaces the error; handles
    /// close on every exit path. The caller decides what a failure means —
    /// the engine never retries.
    pub fn preserve_original(&self, path: &Path) -> Result<BackupOutcome> {
        let size = fs::metadata(path)?.len();
        if size == 0 {
            debug!(path = %path.display(), "empty source, nothing to preserve");
            return Ok(BackupOutcome::EmptySource);
        }

        let mut source = File::open(path)?;

        let shadow_path = self.shadow_path(path);
        let mut shadow = File::create(&shadow_path)?;

        // One bounded buffer, reused across iterations
        let buffer_len = self.chunk_size.min(size as usize);
        let mut buffer = vec![0u8; buffer_len];

        let mut remaining = size;
        while remaining > 0 {
            let want = buffer.len().min(remaining as usize);
            let read = source.read(&mut buffer[..want])?;
            if read == 0 {
                // Source shrank underneath us; set_len below pads the gap
                break;
            }
            shadow.write_all(&buffer[..read])?;
            remaining -= read as u64;
        }

        // Pin the shadow to the originally observed size so a trailing short
        // transfer cannot leave a stale length
        shadow.set_len(size)?;

        drop(shadow);
        drop(source);

        // Remove the original name; the writer's own descriptor stays valid
        // and its pending write lands on the unlinked inode
        fs::remove_file(path)?;

        debug!(
            path = %path.display(),
            shadow = %shadow_path.display(),
            bytes = size - remaining,
            "original preserved"
        );

        Ok(BackupOutcome::Copied {
            bytes: size - remaining,
        })
    }
}
