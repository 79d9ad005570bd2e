//! Filesystem watch → debounced change queue. The watcher
//! itself (inotify/FSEvents plumbing) is out of scope for this crate; this
//! module owns the debounce/coalesce contract that sits between a raw
//! event stream and an `indexer::run_index` partial pass.

pub mod queue;

pub use queue::{ChangeHandler, ChangeQueue};
