//! Storage trait definitions for the trigger state.
//!
//! `StateStore` persists the whole [`PersistedState`] as one unit. There is
//! no schema version: a store only has to round-trip the serde form, and the
//! serde defaults on every record take care of fields added later.
//!
//! In-memory fakes are provided for testing via the `fakes` module.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::schema::PersistedState;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Load/save contract for trigger configuration and tracked pull requests.
///
/// Guarantees:
/// - `load()` returns `Ok(None)` when nothing was ever saved (first run).
/// - `load()` after a successful `save(s)` returns a state equal to `s`.
/// - `save` replaces the previously saved state wholesale.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the previously saved state, if any.
    async fn load(&self) -> StorageResult<Option<PersistedState>>;

    /// Persist the given state, replacing whatever was saved before.
    async fn save(&self, state: &PersistedState) -> StorageResult<()>;
}
