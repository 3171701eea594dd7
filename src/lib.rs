//! # coldvault — incremental, content-addressed, encrypted backup archiver
//!
//! Every unique file body seen under a configured set of source roots is
//! stored exactly once, encrypted at rest, and tracked by a durable index
//! that records every logical path that has ever pointed at it:
//!
//! - [`hasher`] — SHA-256 content identity.
//! - [`cipher`] — Fernet-equivalent authenticated encryption, gzip-framed.
//! - [`blob_store`] — sharded on-disk blob layout.
//! - [`scanner`] — recursive, symlink-safe directory walk.
//! - [`pipeline`] — bounded-parallelism batch hashing/encryption.
//! - [`index`] — the active/history catalog and its atomic persistence.
//! - [`archive`] — the reconciler: backup, restore, and cleanup.
//! - [`config`] — backup configuration file loading.
//! - [`logging`] — the console logging sink installed by the CLI.

pub mod archive;
pub mod blob_store;
pub mod cipher;
pub mod config;
pub mod hasher;
pub mod index;
pub mod logging;
pub mod pipeline;
pub mod scanner;

pub use archive::{
    Archive, ArchiveError, BackupStats, CleanupStats, Confirm, InfoReport, RestoreStats,
    StdinConfirm,
};
pub use config::{BackupConfig, ConfigError};
pub use index::{ArchiveEntry, ArchiveFilePointer, ArchiveIndex, ArchiveLogEvent, LogEventKind};
