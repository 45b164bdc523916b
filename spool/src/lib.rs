//! Persistent spool (C9, spec.md §4.9 / "Persistent-state file layout" in
//! §6): the durable append log for shares, the archive log for pruned
//! shares, and the peer address book, with recovery on restart.
//!
//! Split out of the teacher's `storage` crate: the teacher's `BlockStore`
//! bundled chain indexing and persistence into one trait. P2Pool separates
//! them because the in-memory DAG (`tracker`, C2) and durable persistence
//! (`spool`, C9) have different lifecycles — the tracker prunes entries
//! from memory well before the spool would ever delete their archived copy.

pub mod address_book;
pub mod share_log;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use address_book::{AddressBook, PeerRecord};
pub use share_log::ShareLog;

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Bundles the share log and address book under one data directory and
/// drives recovery at startup.
pub struct Spool {
    pub shares: ShareLog,
    pub peers: AddressBook,
}

impl Spool {
    pub async fn open(base_dir: impl AsRef<Path>) -> Result<Self, SpoolError> {
        let base_dir: PathBuf = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        let shares = ShareLog::open(&base_dir).await?;
        let peers = AddressBook::open(&base_dir).await?;
        Ok(Spool { shares, peers })
    }
}
