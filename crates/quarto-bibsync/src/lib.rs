//! quarto-bibsync: keeps a BibTeX database and a Quarto reading-notes
//! document in sync
//!
//! This crate provides:
//! - Parsers and surgical writers for `.bib` files and notes documents
//! - A reconciler that propagates each side's owned data to the other
//!   (citation metadata from the bib file, notes from the document)
//! - A debounced watch loop that keeps configured pairs in sync

pub mod bib;
pub mod config;
pub mod doc;
pub mod entry;
pub mod error;
pub mod fs_util;
pub mod ownership;
pub mod pair;
pub mod reconcile;
pub mod snapshot;
pub mod watch;
pub mod watch_loop;

pub use config::{Config, ResolvedPair};
pub use entry::{Entry, EntryMap, Parsed};
pub use error::{Error, RecordError, Result};
pub use ownership::{FieldClass, Side};
pub use pair::{PassReport, SyncPair, SyncResult};
pub use reconcile::{ReconcileOptions, Reconciler};
pub use snapshot::Snapshot;
pub use watch::FileWatcher;
pub use watch_loop::{LoopTiming, WatchMachine, run_watch_loop};
