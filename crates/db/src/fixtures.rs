use std::collections::BTreeMap;

use rust_decimal::Decimal;

use callquote_core::domain::conversation::ServiceFrequency;
use callquote_core::domain::tenant::{PricingTier, TenantId, TenantProfile};

use crate::connection::DbPool;
use crate::repositories::{RepositoryError, SqlTenantRepository, TenantRepository};

pub const DEMO_TENANT_ID: &str = "green-acres";

/// Lawn-care tenant used by `seed`, local development and tests.
pub fn demo_tenant() -> TenantProfile {
    TenantProfile {
        tenant_id: TenantId(DEMO_TENANT_ID.to_string()),
        business_name: "Green Acres Lawn Care".to_string(),
        phone: Some("(214) 555-0199".to_string()),
        services: vec![
            "mowing".to_string(),
            "edging".to_string(),
            "blowing off walks and drives".to_string(),
        ],
        service_area: Some("Dallas, TX and 25 miles around".to_string()),
        hours: Some("Monday to Saturday, 8am to 6pm".to_string()),
        pricing_tiers: vec![
            tier("small", 5_000, [35, 45, 60, 75]),
            tier("medium", 10_000, [45, 55, 75, 95]),
            tier("large", 20_000, [60, 75, 100, 125]),
        ],
    }
}

fn tier(name: &str, max_lot_sqft: u32, prices: [i64; 4]) -> PricingTier {
    PricingTier {
        name: name.to_string(),
        max_lot_sqft,
        prices: ServiceFrequency::ALL
            .into_iter()
            .zip(prices)
            .map(|(frequency, price)| (frequency, Decimal::new(price, 0)))
            .collect::<BTreeMap<_, _>>(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub tenants_seeded: Vec<String>,
}

pub struct DemoSeed;

impl DemoSeed {
    /// Upserts the demo tenant. Safe to run repeatedly.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let repo = SqlTenantRepository::new(pool.clone());
        let profile = demo_tenant();
        let tenant_id = profile.tenant_id.0.clone();
        repo.save(profile).await?;
        Ok(SeedResult { tenants_seeded: vec![tenant_id] })
    }

    pub async fn verify(pool: &DbPool) -> Result<bool, RepositoryError> {
        let repo = SqlTenantRepository::new(pool.clone());
        let stored = repo.find_by_id(&TenantId(DEMO_TENANT_ID.to_string())).await?;
        Ok(stored.as_ref() == Some(&demo_tenant()))
    }
}
