use chrono::Utc;
use sqlx::Row;

use callquote_core::domain::tenant::{TenantId, TenantProfile};

use super::{RepositoryError, TenantRepository};
use crate::DbPool;

pub struct SqlTenantRepository {
    pool: DbPool,
}

impl SqlTenantRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TenantRepository for SqlTenantRepository {
    async fn find_by_id(&self, id: &TenantId) -> Result<Option<TenantProfile>, RepositoryError> {
        let row = sqlx::query("SELECT profile_json FROM tenant_profile WHERE tenant_id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let raw: String = row.try_get("profile_json")?;
            serde_json::from_str::<TenantProfile>(&raw).map_err(|error| {
                RepositoryError::Decode(format!("invalid profile_json for tenant `{}`: {error}", id.0))
            })
        })
        .transpose()
    }

    async fn save(&self, profile: TenantProfile) -> Result<(), RepositoryError> {
        let profile_json = serde_json::to_string(&profile)
            .map_err(|error| RepositoryError::Decode(format!("encode tenant profile: {error}")))?;

        sqlx::query(
            "INSERT INTO tenant_profile (tenant_id, business_name, profile_json, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(tenant_id) DO UPDATE SET
                business_name = excluded.business_name,
                profile_json = excluded.profile_json,
                updated_at = excluded.updated_at",
        )
        .bind(&profile.tenant_id.0)
        .bind(&profile.business_name)
        .bind(profile_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
