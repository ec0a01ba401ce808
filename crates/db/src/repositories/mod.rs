use async_trait::async_trait;
use thiserror::Error;

use callquote_core::domain::conversation::{CallId, ConversationState};
use callquote_core::domain::tenant::{TenantId, TenantProfile};

pub mod conversation;
pub mod memory;
pub mod tenant;

pub use conversation::SqlConversationRepository;
pub use memory::{InMemoryConversationRepository, InMemoryTenantRepository};
pub use tenant::SqlTenantRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conversation `{call_id}` was modified concurrently (expected version {expected})")]
    Conflict { call_id: String, expected: u32 },
}

/// One record per call. `save` is a compare-and-swap on `version`.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_call_id(
        &self,
        call_id: &CallId,
    ) -> Result<Option<ConversationState>, RepositoryError>;

    /// Persists `state` only if the stored version still equals `state.version`
    /// (0 for a record that was never saved). Returns the new version.
    async fn save(&self, state: &ConversationState) -> Result<u32, RepositoryError>;
}

#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn find_by_id(&self, id: &TenantId) -> Result<Option<TenantProfile>, RepositoryError>;
    async fn save(&self, profile: TenantProfile) -> Result<(), RepositoryError>;
}
