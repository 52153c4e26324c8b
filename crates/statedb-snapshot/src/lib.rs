//! # statedb-snapshot
//!
//! Background flat-state snapshot generation for the statedb trie database.
//!
//! The generator materializes a key-to-value mirror of the Merkle trie onto
//! the persistent store. It is resumable across restarts (a progress marker
//! is journalled with every flushed batch), interruptible on demand through
//! a synchronous stop handshake, and cross-checks existing mirror segments
//! against the trie with Merkle range proofs, regenerating only the segments
//! that diverge.
//!
//! ```no_run
//! use alloy_primitives::B256;
//! use statedb_snapshot::{Generator, GeneratorConfig};
//! use statedb_storage::{Database, Storage};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db: Arc<dyn Storage> = Arc::new(Database::open("/var/lib/statedb")?);
//! let mut generator = Generator::new(db, GeneratorConfig::default())?;
//! let state_root = B256::ZERO; // the root to mirror
//! generator.run(state_root);
//! // ... later ...
//! generator.stop();
//! # Ok(())
//! # }
//! ```

pub mod account;

mod config;
mod context;
mod error;
mod generator;
mod journal;
mod marker;
mod prover;
mod range;
mod stats;

pub use config::GeneratorConfig;
pub use error::{SnapshotError, SnapshotResult};
pub use generator::Generator;
pub use journal::{load_snapshot_root, GeneratorRecord};
pub use marker::Marker;
pub use stats::GeneratorStats;
