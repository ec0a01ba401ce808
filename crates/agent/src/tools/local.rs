//! In-process tool servers computed from a tenant profile.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use callquote_core::domain::conversation::ServiceFrequency;
use callquote_core::domain::tenant::TenantProfile;
use chrono::{DateTime, Datelike, Duration, FixedOffset, TimeZone, Weekday};
use serde_json::{json, Value};

use super::{
    Tool, ToolError, ToolGateway, ToolRegistry, BUSINESS_SERVER, CALENDAR_SERVER, PROPERTY_SERVER,
};

/// Inputs for a fully local tool set.
#[derive(Clone, Debug)]
pub struct LocalToolSet {
    pub tenant: TenantProfile,
    /// Lot sizes keyed by lowercase street line.
    pub lots: HashMap<String, u32>,
    pub serviced_zip_prefixes: Vec<String>,
    pub slots: Vec<DateTime<FixedOffset>>,
}

impl LocalToolSet {
    pub fn new(tenant: TenantProfile) -> Self {
        Self { tenant, lots: HashMap::new(), serviced_zip_prefixes: Vec::new(), slots: Vec::new() }
    }

    pub fn with_lot(mut self, street: &str, lot_size_sqft: u32) -> Self {
        self.lots.insert(street.trim().to_ascii_lowercase(), lot_size_sqft);
        self
    }

    pub fn serving_zip_prefix(mut self, prefix: &str) -> Self {
        self.serviced_zip_prefixes.push(prefix.to_string());
        self
    }

    pub fn with_slots(mut self, slots: Vec<DateTime<FixedOffset>>) -> Self {
        self.slots = slots;
        self
    }

    pub fn into_registry(self) -> ToolRegistry {
        let mut registry = ToolRegistry::default();
        registry.register(PropertyLookup { lots: self.lots });
        registry.register(ServiceArea { zip_prefixes: self.serviced_zip_prefixes });
        registry.register(QuoteCalculator { tenant: self.tenant.clone() });
        registry.register(GenericPriceRange { tenant: self.tenant });
        registry.register(AvailableSlots { slots: self.slots });
        registry.register(BookAppointment { next_event: AtomicU32::new(1) });
        registry
    }
}

/// Working-hour slots on weekdays, starting the day after `from`.
pub fn weekday_slots(from: DateTime<FixedOffset>, days: u32, hours: &[u32]) -> Vec<DateTime<FixedOffset>> {
    let offset = *from.offset();
    let mut slots = Vec::new();
    for day in 1..=i64::from(days) {
        let date = from.date_naive() + Duration::days(day);
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            continue;
        }
        for hour in hours {
            if let Some(start) = date
                .and_hms_opt(*hour, 0, 0)
                .and_then(|naive| offset.from_local_datetime(&naive).single())
            {
                slots.push(start);
            }
        }
    }
    slots
}

struct PropertyLookup {
    lots: HashMap<String, u32>,
}

#[async_trait]
impl Tool for PropertyLookup {
    fn server(&self) -> &'static str {
        PROPERTY_SERVER
    }

    fn name(&self) -> &'static str {
        "lookup_property"
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let street = input["street"].as_str().context("street is required")?;
        match self.lots.get(&street.trim().to_ascii_lowercase()) {
            Some(lot) => Ok(json!({
                "found": true,
                "lot_size_sqft": lot,
                "parcel_id": format!("PCL-{}", street.split_whitespace().next().unwrap_or("0")),
            })),
            None => Ok(json!({ "found": false })),
        }
    }
}

struct ServiceArea {
    zip_prefixes: Vec<String>,
}

#[async_trait]
impl Tool for ServiceArea {
    fn server(&self) -> &'static str {
        BUSINESS_SERVER
    }

    fn name(&self) -> &'static str {
        "validate_service_area"
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let zip = input["address"]["zip"].as_str().context("address.zip is required")?;
        let in_area = self.zip_prefixes.iter().any(|prefix| zip.starts_with(prefix.as_str()));
        Ok(json!({ "in_area": in_area }))
    }
}

struct QuoteCalculator {
    tenant: TenantProfile,
}

#[async_trait]
impl Tool for QuoteCalculator {
    fn server(&self) -> &'static str {
        BUSINESS_SERVER
    }

    fn name(&self) -> &'static str {
        "calculate_quote"
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let lot = input["lot_size_sqft"].as_u64().context("lot_size_sqft is required")?;
        let frequency = input["frequency"]
            .as_str()
            .and_then(ServiceFrequency::parse)
            .ok_or_else(|| anyhow!("unknown frequency"))?;

        let mut tiers: Vec<_> = self.tenant.pricing_tiers.iter().collect();
        tiers.sort_by_key(|tier| tier.max_lot_sqft);
        let Some(tier) = tiers.into_iter().find(|tier| u64::from(tier.max_lot_sqft) >= lot) else {
            return Ok(json!({ "status": "no_matching_tier" }));
        };
        let Some(price) = tier.prices.get(&frequency) else {
            bail!("tier `{}` has no {} price", tier.name, frequency.as_str());
        };

        Ok(json!({
            "status": "priced",
            "price": price.to_string(),
            "tier": tier.name,
            "inclusions": self.tenant.services,
        }))
    }
}

struct GenericPriceRange {
    tenant: TenantProfile,
}

#[async_trait]
impl Tool for GenericPriceRange {
    fn server(&self) -> &'static str {
        BUSINESS_SERVER
    }

    fn name(&self) -> &'static str {
        "get_generic_price_range"
    }

    async fn execute(&self, _input: Value) -> Result<Value> {
        let (min, max) = self.tenant.price_range().context("tenant has no pricing tiers")?;
        Ok(json!({ "min": min.to_string(), "max": max.to_string() }))
    }
}

struct AvailableSlots {
    slots: Vec<DateTime<FixedOffset>>,
}

#[async_trait]
impl Tool for AvailableSlots {
    fn server(&self) -> &'static str {
        CALENDAR_SERVER
    }

    fn name(&self) -> &'static str {
        "get_available_slots"
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let start = DateTime::parse_from_rfc3339(input["start"].as_str().context("start is required")?)?;
        let end = DateTime::parse_from_rfc3339(input["end"].as_str().context("end is required")?)?;
        let slots: Vec<Value> = self
            .slots
            .iter()
            .filter(|slot| **slot >= start && **slot < end)
            .map(|slot| json!({ "start": slot.to_rfc3339(), "end": (*slot + Duration::hours(1)).to_rfc3339() }))
            .collect();
        Ok(json!({ "slots": slots }))
    }
}

struct BookAppointment {
    next_event: AtomicU32,
}

#[async_trait]
impl Tool for BookAppointment {
    fn server(&self) -> &'static str {
        CALENDAR_SERVER
    }

    fn name(&self) -> &'static str {
        "book_appointment"
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let start = input["start_time"].as_str().context("start_time is required")?;
        DateTime::parse_from_rfc3339(start)?;
        let event = self.next_event.fetch_add(1, Ordering::Relaxed);
        Ok(json!({ "event_id": format!("evt-{event:04}"), "scheduled_time": start }))
    }
}

/// Wraps a gateway and remembers every `server.tool` it was asked for.
pub struct RecordingGateway<G> {
    inner: G,
    calls: Arc<Mutex<Vec<String>>>,
}

impl<G> RecordingGateway<G> {
    pub fn new(inner: G) -> Self {
        Self { inner, calls: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Handle that stays readable after the gateway is moved into a runtime.
    pub fn call_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl<G: ToolGateway> ToolGateway for RecordingGateway<G> {
    async fn call(&self, server: &str, tool: &str, args: Value) -> Result<Value, ToolError> {
        match self.calls.lock() {
            Ok(mut calls) => calls.push(format!("{server}.{tool}")),
            Err(poisoned) => poisoned.into_inner().push(format!("{server}.{tool}")),
        }
        self.inner.call(server, tool, args).await
    }
}
