use std::collections::HashMap;

use tokio::sync::RwLock;

use callquote_core::domain::conversation::{CallId, ConversationState};
use callquote_core::domain::tenant::{TenantId, TenantProfile};

use super::{ConversationRepository, RepositoryError, TenantRepository};

#[derive(Default)]
pub struct InMemoryConversationRepository {
    states: RwLock<HashMap<String, ConversationState>>,
}

impl InMemoryConversationRepository {
    /// Number of stored records, for assertions in tests.
    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find_by_call_id(
        &self,
        call_id: &CallId,
    ) -> Result<Option<ConversationState>, RepositoryError> {
        let states = self.states.read().await;
        Ok(states.get(&call_id.0).cloned())
    }

    async fn save(&self, state: &ConversationState) -> Result<u32, RepositoryError> {
        let mut states = self.states.write().await;
        let stored_version = states.get(&state.call_id.0).map(|stored| stored.version).unwrap_or(0);
        if stored_version != state.version {
            return Err(RepositoryError::Conflict {
                call_id: state.call_id.0.clone(),
                expected: state.version,
            });
        }

        let mut stored = state.clone();
        stored.version = state.version + 1;
        let version = stored.version;
        states.insert(state.call_id.0.clone(), stored);
        Ok(version)
    }
}

#[derive(Default)]
pub struct InMemoryTenantRepository {
    tenants: RwLock<HashMap<String, TenantProfile>>,
}

impl InMemoryTenantRepository {
    pub fn with_profile(profile: TenantProfile) -> Self {
        let mut tenants = HashMap::new();
        tenants.insert(profile.tenant_id.0.clone(), profile);
        Self { tenants: RwLock::new(tenants) }
    }
}

#[async_trait::async_trait]
impl TenantRepository for InMemoryTenantRepository {
    async fn find_by_id(&self, id: &TenantId) -> Result<Option<TenantProfile>, RepositoryError> {
        let tenants = self.tenants.read().await;
        Ok(tenants.get(&id.0).cloned())
    }

    async fn save(&self, profile: TenantProfile) -> Result<(), RepositoryError> {
        let mut tenants = self.tenants.write().await;
        tenants.insert(profile.tenant_id.0.clone(), profile);
        Ok(())
    }
}
