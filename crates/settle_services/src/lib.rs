//! Settle Services Layer
//!
//! Configuration, output files and the run store: everything the packing
//! run reads from or writes to disk.

pub mod output;
pub mod settings;
pub mod store;

pub use output::{LoggingRow, LoggingWriter, OutputError, ParticleRecord, SnapshotWriter};
pub use settings::{load_settings, ConfigError, Settings};
pub use store::{RunRecord, RunStore, StoreError, StoredRun};
