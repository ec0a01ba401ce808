use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::conversation::ServiceFrequency;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTier {
    pub name: String,
    pub max_lot_sqft: u32,
    pub prices: BTreeMap<ServiceFrequency, Decimal>,
}

/// Read-only business facts the receptionist speaks from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantProfile {
    pub tenant_id: TenantId,
    pub business_name: String,
    pub phone: Option<String>,
    #[serde(default)]
    pub services: Vec<String>,
    pub service_area: Option<String>,
    pub hours: Option<String>,
    #[serde(default)]
    pub pricing_tiers: Vec<PricingTier>,
}

impl TenantProfile {
    /// Frequencies priced by at least one tier, in canonical order.
    pub fn supported_frequencies(&self) -> Vec<ServiceFrequency> {
        ServiceFrequency::ALL
            .into_iter()
            .filter(|frequency| {
                self.pricing_tiers.iter().any(|tier| tier.prices.contains_key(frequency))
            })
            .collect()
    }

    pub fn largest_tier_sqft(&self) -> Option<u32> {
        self.pricing_tiers.iter().map(|tier| tier.max_lot_sqft).max()
    }

    pub fn price_range(&self) -> Option<(Decimal, Decimal)> {
        let mut prices = self.pricing_tiers.iter().flat_map(|tier| tier.prices.values().copied());
        let first = prices.next()?;
        Some(prices.fold((first, first), |(min, max), price| (min.min(price), max.max(price))))
    }

    /// Plain-text fact sheet handed to the extraction capability.
    pub fn fact_sheet(&self) -> String {
        let mut lines = vec![format!("Business: {}", self.business_name)];
        if !self.services.is_empty() {
            lines.push(format!("Services: {}", self.services.join(", ")));
        }
        if let Some(area) = &self.service_area {
            lines.push(format!("Service area: {area}"));
        }
        if let Some(hours) = &self.hours {
            lines.push(format!("Hours: {hours}"));
        }
        if let Some((min, max)) = self.price_range() {
            lines.push(format!("Prices: from ${min} to ${max} per visit"));
        }
        let frequencies = self.supported_frequencies();
        if !frequencies.is_empty() {
            let spoken: Vec<&str> = frequencies.iter().map(ServiceFrequency::spoken).collect();
            lines.push(format!("Frequencies: {}", spoken.join(", ")));
        }
        if let Some(phone) = &self.phone {
            lines.push(format!("Phone: {phone}"));
        }
        lines.join("\n")
    }
}
