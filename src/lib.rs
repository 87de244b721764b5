pub mod config;
pub mod db;
pub mod error;
mod harvester;
pub mod oai;
pub mod state;
pub mod writer;

use std::path::{Path, PathBuf};

pub use config::{Granularity, GranularityPolicy, HarvestConfig, HarvesterOptions, SetSelector};
pub use error::{HarvestError, StateError, TransportError, WriterError};
pub use harvester::Harvester;
pub use oai::{BasicAuth, Communicator, HttpCommunicator, RawRecord, RecordHeader, ResponseEnvelope, Verb};
pub use state::{CHECKPOINT_ARTIFACT, Checkpoint, FileStateManager, StateManager};
pub use writer::{PgRecordWriter, RecordWriter};

pub fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}
