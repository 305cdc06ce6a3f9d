pub mod error;
pub mod event;
pub mod flusher;
pub mod object_store;

pub use error::{ConfigError, LockResultExt, SchedulerError, StorageError};
pub use event::{Batch, Event, TierStats, EVENT_OVERHEAD_BYTES};
pub use flusher::{FlushResult, Flusher, SchedulerState};
pub use object_store::{ObjectStore, Uploader};
