//! Pre-write protection filter
//!
//! The core interception subsystem: per-session file contexts, the
//! attach-if-absent context store, the copy-and-replace backup engine, and
//! the operation interceptor that ties them together. Nothing in this module
//! depends on the FUSE host; it is driven entirely through events.

mod backup;
mod context;
mod interceptor;
mod store;

pub use backup::{BackupEngine, BackupOutcome};
pub use context::FileContext;
pub use interceptor::{
    CleanupEvent, Disposition, Interceptor, OpenDisposition, OpenEvent, RequestOrigin, WriteEvent,
};
pub use store::{AttachOutcome, ContextStore, FileObjectId};
