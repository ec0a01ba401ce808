use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use callquote_core::domain::conversation::{
    BookingDetails, ConversationState, CustomerAddress, PropertyData, QuoteAmount, QuoteDetails,
    ServiceFrequency, TimeSlot,
};
use callquote_core::domain::tenant::TenantId;
use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::debug;

use super::{ToolError, ToolGateway, BUSINESS_SERVER, CALENDAR_SERVER, PROPERTY_SERVER};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuoteOutcome {
    Priced(QuoteDetails),
    /// Lot is larger than every configured tier.
    NoMatchingTier,
}

/// Typed, timeout-bounded calls over a [`ToolGateway`].
#[derive(Clone)]
pub struct BusinessTools {
    gateway: Arc<dyn ToolGateway>,
    timeout: Duration,
}

impl BusinessTools {
    pub fn new(gateway: Arc<dyn ToolGateway>, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    /// `Ok(None)` when the lookup service has no record for the address.
    pub async fn lookup_property(
        &self,
        address: &CustomerAddress,
    ) -> Result<Option<PropertyData>, ToolError> {
        let tool = "lookup_property";
        let result = self.call(PROPERTY_SERVER, tool, address_args(address)).await?;

        if result.get("found").and_then(Value::as_bool) == Some(false) {
            return Ok(None);
        }
        let Some(lot_size) = result.get("lot_size_sqft").and_then(Value::as_u64) else {
            return Ok(None);
        };
        let lot_size_sqft = u32::try_from(lot_size)
            .map_err(|_| ToolError::malformed(PROPERTY_SERVER, tool, "lot size out of range"))?;

        Ok(Some(PropertyData {
            lot_size_sqft,
            parcel_id: result.get("parcel_id").and_then(Value::as_str).map(str::to_string),
        }))
    }

    pub async fn validate_service_area(
        &self,
        tenant_id: &TenantId,
        address: &CustomerAddress,
    ) -> Result<bool, ToolError> {
        let tool = "validate_service_area";
        let result = self
            .call(
                BUSINESS_SERVER,
                tool,
                json!({ "tenant_id": tenant_id.0, "address": address_args(address) }),
            )
            .await?;

        result
            .get("in_area")
            .and_then(Value::as_bool)
            .ok_or_else(|| ToolError::malformed(BUSINESS_SERVER, tool, "missing `in_area`"))
    }

    pub async fn calculate_quote(
        &self,
        tenant_id: &TenantId,
        lot_size_sqft: u32,
        frequency: ServiceFrequency,
    ) -> Result<QuoteOutcome, ToolError> {
        let tool = "calculate_quote";
        let result = self
            .call(
                BUSINESS_SERVER,
                tool,
                json!({
                    "tenant_id": tenant_id.0,
                    "lot_size_sqft": lot_size_sqft,
                    "frequency": frequency.as_str(),
                }),
            )
            .await?;

        if result.get("status").and_then(Value::as_str) == Some("no_matching_tier") {
            return Ok(QuoteOutcome::NoMatchingTier);
        }

        let price = decimal_field(&result, "price")
            .ok_or_else(|| ToolError::malformed(BUSINESS_SERVER, tool, "missing `price`"))?;
        let inclusions = result
            .get("inclusions")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        Ok(QuoteOutcome::Priced(QuoteDetails {
            amount: QuoteAmount::Fixed { price },
            frequency,
            inclusions,
            tier: result.get("tier").and_then(Value::as_str).map(str::to_string),
        }))
    }

    pub async fn get_generic_price_range(
        &self,
        tenant_id: &TenantId,
    ) -> Result<(Decimal, Decimal), ToolError> {
        let tool = "get_generic_price_range";
        let result = self.call(BUSINESS_SERVER, tool, json!({ "tenant_id": tenant_id.0 })).await?;

        match (decimal_field(&result, "min"), decimal_field(&result, "max")) {
            (Some(min), Some(max)) if min <= max => Ok((min, max)),
            _ => Err(ToolError::malformed(BUSINESS_SERVER, tool, "missing or inverted range")),
        }
    }

    pub async fn get_available_slots(
        &self,
        tenant_id: &TenantId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimeSlot>, ToolError> {
        let tool = "get_available_slots";
        let result = self
            .call(
                CALENDAR_SERVER,
                tool,
                json!({
                    "tenant_id": tenant_id.0,
                    "start": start.to_rfc3339(),
                    "end": end.to_rfc3339(),
                }),
            )
            .await?;

        let entries = result
            .get("slots")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::malformed(CALENDAR_SERVER, tool, "missing `slots`"))?;

        let mut slots = Vec::with_capacity(entries.len());
        for entry in entries {
            let start = entry
                .get("start")
                .and_then(Value::as_str)
                .and_then(parse_time)
                .ok_or_else(|| ToolError::malformed(CALENDAR_SERVER, tool, "slot without start"))?;
            let end = entry.get("end").and_then(Value::as_str).and_then(parse_time);
            slots.push(TimeSlot { start, end });
        }
        slots.sort_by_key(|slot| slot.start);
        Ok(slots)
    }

    /// Only an answer carrying a non-empty event id counts as booked.
    pub async fn book_appointment(
        &self,
        state: &ConversationState,
        start: DateTime<FixedOffset>,
    ) -> Result<BookingDetails, ToolError> {
        let tool = "book_appointment";
        let price = state.quote.as_ref().and_then(QuoteDetails::fixed_price);
        let result = self
            .call(
                CALENDAR_SERVER,
                tool,
                json!({
                    "tenant_id": state.tenant_id.0,
                    "start_time": start.to_rfc3339(),
                    "customer": {
                        "name": state.customer_name,
                        "phone": state.customer_phone,
                        "address": state.customer_address.as_ref().map(address_args),
                    },
                    "frequency": state.preferred_frequency.map(|frequency| frequency.as_str()),
                    "price": price.map(|price| price.to_string()),
                }),
            )
            .await?;

        let calendar_event_id = result
            .get("event_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ToolError::failed(CALENDAR_SERVER, tool, "no event id returned"))?;
        let scheduled_time =
            result.get("scheduled_time").and_then(Value::as_str).and_then(parse_time).unwrap_or(start);

        Ok(BookingDetails { scheduled_time, calendar_event_id: calendar_event_id.to_string() })
    }

    async fn call(&self, server: &str, tool: &str, args: Value) -> Result<Value, ToolError> {
        debug!(event_name = "tool.call.started", server, tool, "calling tool");
        match tokio::time::timeout(self.timeout, self.gateway.call(server, tool, args)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                server: server.to_string(),
                tool: tool.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}

fn address_args(address: &CustomerAddress) -> Value {
    json!({
        "street": address.street,
        "city": address.city,
        "state": address.state,
        "zip": address.zip,
    })
}

fn parse_time(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value).ok()
}

fn decimal_field(value: &Value, key: &str) -> Option<Decimal> {
    match value.get(key)? {
        Value::String(text) => Decimal::from_str(text.trim()).ok(),
        Value::Number(number) => match number.as_i64() {
            Some(whole) => Some(Decimal::from(whole)),
            None => number.as_f64().and_then(|float| Decimal::try_from(float).ok()),
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use callquote_core::domain::conversation::{
        CallId, ConversationState, CustomerAddress, ServiceFrequency,
    };
    use callquote_core::domain::tenant::TenantId;
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;
    use serde_json::{json, Value};

    use super::{BusinessTools, QuoteOutcome};
    use crate::tools::{ToolError, ToolGateway};

    struct Fixed(Value);

    #[async_trait]
    impl ToolGateway for Fixed {
        async fn call(&self, _server: &str, _tool: &str, _args: Value) -> Result<Value, ToolError> {
            Ok(self.0.clone())
        }
    }

    struct Hanging;

    #[async_trait]
    impl ToolGateway for Hanging {
        async fn call(&self, _server: &str, _tool: &str, _args: Value) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Value::Null)
        }
    }

    fn tools(answer: Value) -> BusinessTools {
        BusinessTools::new(Arc::new(Fixed(answer)), Duration::from_millis(100))
    }

    fn address() -> CustomerAddress {
        CustomerAddress {
            street: "1200 Main Street".to_string(),
            city: "Dallas".to_string(),
            state: "TX".to_string(),
            zip: "75202".to_string(),
        }
    }

    fn tenant() -> TenantId {
        TenantId("green-acres".to_string())
    }

    #[tokio::test]
    async fn lookup_not_found_is_none() {
        let result = tools(json!({ "found": false })).lookup_property(&address()).await;
        assert_eq!(result.expect("lookup"), None);

        let found = tools(json!({ "found": true, "lot_size_sqft": 8200, "parcel_id": "P-1" }))
            .lookup_property(&address())
            .await
            .expect("lookup")
            .expect("property");
        assert_eq!(found.lot_size_sqft, 8_200);
        assert_eq!(found.parcel_id.as_deref(), Some("P-1"));
    }

    #[tokio::test]
    async fn quote_accepts_string_or_number_prices() {
        let priced = tools(json!({ "price": "45.00", "tier": "medium", "inclusions": ["mowing"] }))
            .calculate_quote(&tenant(), 8_200, ServiceFrequency::Weekly)
            .await
            .expect("quote");
        let QuoteOutcome::Priced(details) = priced else {
            panic!("expected a priced quote");
        };
        assert_eq!(details.fixed_price(), Some(Decimal::new(4500, 2)));
        assert_eq!(details.inclusions, vec!["mowing".to_string()]);

        let numeric = tools(json!({ "price": 55 }))
            .calculate_quote(&tenant(), 8_200, ServiceFrequency::Biweekly)
            .await
            .expect("quote");
        assert!(matches!(numeric, QuoteOutcome::Priced(ref d) if d.fixed_price() == Some(Decimal::new(55, 0))));

        let large = tools(json!({ "status": "no_matching_tier" }))
            .calculate_quote(&tenant(), 90_000, ServiceFrequency::Weekly)
            .await
            .expect("quote");
        assert_eq!(large, QuoteOutcome::NoMatchingTier);
    }

    #[tokio::test]
    async fn area_answer_without_flag_is_malformed() {
        let error = tools(json!({ "ok": true }))
            .validate_service_area(&tenant(), &address())
            .await
            .expect_err("malformed");
        assert!(matches!(error, ToolError::Malformed { .. }));
    }

    #[tokio::test]
    async fn slots_are_sorted_and_parsed() {
        let slots = tools(json!({ "slots": [
            { "start": "2026-03-04T14:00:00-06:00" },
            { "start": "2026-03-03T09:00:00-06:00", "end": "2026-03-03T10:00:00-06:00" },
        ]}))
        .get_available_slots(&tenant(), Utc::now(), Utc::now())
        .await
        .expect("slots");

        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].start, DateTime::parse_from_rfc3339("2026-03-03T09:00:00-06:00").expect("time"));
        assert!(slots[0].end.is_some());
    }

    #[tokio::test]
    async fn booking_without_event_id_is_a_failure() {
        let state = ConversationState::new(
            CallId("CA-1".to_string()),
            tenant(),
            None,
            Utc::now(),
        );
        let start = DateTime::parse_from_rfc3339("2026-03-03T09:00:00-06:00").expect("time");

        let error = tools(json!({ "event_id": "  " })).book_appointment(&state, start).await.expect_err("no id");
        assert!(matches!(error, ToolError::Failed { .. }));

        let booked = tools(json!({ "event_id": "evt-42" })).book_appointment(&state, start).await.expect("booked");
        assert_eq!(booked.calendar_event_id, "evt-42");
        assert_eq!(booked.scheduled_time, start);
    }

    #[tokio::test]
    async fn stuck_gateway_times_out() {
        let tools = BusinessTools::new(Arc::new(Hanging), Duration::from_millis(20));
        let error = tools.get_generic_price_range(&tenant()).await.expect_err("timeout");
        assert!(matches!(error, ToolError::Timeout { .. }));
    }
}
