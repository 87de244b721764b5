//! Durable storage for the harvest checkpoint and the last-harvest marker.
//! The reference implementation is file-backed; the trait is the real
//! contract, so a test double is a second implementation rather than a
//! runtime patch.

mod file;

pub use file::FileStateManager;

use async_trait::async_trait;

use crate::error::StateError;

/// Historical artifact name: user-visible reset messages name it so an
/// operator can correlate a reset with the file on disk, regardless of
/// which `StateManager` implementation is actually in play.
pub const CHECKPOINT_ARTIFACT: &str = "last_state.txt";

/// The four-field persisted cursor representing in-progress harvest
/// position. Any other arity is corrupt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub set_spec: Option<String>,
    pub resumption_token: String,
    pub effective_start_date: Option<String>,
    pub effective_end_date: Option<String>,
}

#[async_trait]
pub trait StateManager: Send + Sync {
    async fn load_state(&self) -> Result<Option<Checkpoint>, StateError>;
    async fn save_state(&self, checkpoint: &Checkpoint) -> Result<(), StateError>;
    async fn clear_state(&self) -> Result<(), StateError>;
    async fn load_date(&self) -> Result<Option<String>, StateError>;
    async fn save_date(&self, date: &str) -> Result<(), StateError>;
}
