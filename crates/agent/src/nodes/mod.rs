//! The eight stage nodes.
//!
//! A node reads the record and returns a [`StateUpdate`]. It never returns an
//! error: extraction and tool failures are logged and turned into a spoken
//! fallback plus a next stage.

mod address;
mod booking;
mod closing;
mod frequency;
mod greeting;
mod intent;
mod property;
mod quote;

use std::fmt::Display;

use async_trait::async_trait;
use callquote_core::config::ConversationConfig;
use callquote_core::domain::conversation::{ConversationState, StateUpdate};
use callquote_core::domain::tenant::TenantProfile;
use callquote_core::flows::NodeKind;
use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use tracing::warn;

use crate::extraction::{system_context, Extractor};
use crate::runtime::Clock;
use crate::tools::BusinessTools;

pub use address::AddressExtractionNode;
pub use booking::BookingNode;
pub use closing::ClosingNode;
pub use frequency::FrequencyCollectionNode;
pub use greeting::GreetingNode;
pub use intent::IntentRouterNode;
pub use property::PropertyLookupNode;
pub use quote::QuoteCalculationNode;

/// Everything a node may consult besides the record itself.
pub struct NodeContext<'a> {
    pub extractor: &'a Extractor,
    pub tools: &'a BusinessTools,
    /// `None` when the tenant is unknown or could not be read this turn.
    pub tenant: Option<&'a TenantProfile>,
    /// The tenant store errored, as opposed to having no such tenant.
    pub tenant_lookup_failed: bool,
    pub clock: &'a dyn Clock,
    pub settings: &'a ConversationConfig,
    pub correlation_id: &'a str,
}

impl NodeContext<'_> {
    pub fn system_context(&self, state: &ConversationState) -> String {
        system_context(self.tenant, state)
    }

    pub fn business_name(&self) -> Option<&str> {
        self.tenant.map(|tenant| tenant.business_name.as_str())
    }

    pub fn business_phone(&self) -> Option<&str> {
        self.tenant.and_then(|tenant| tenant.phone.as_deref())
    }
}

#[async_trait]
pub trait StageNode: Send + Sync {
    fn kind(&self) -> NodeKind;
    async fn run(&self, state: &ConversationState, ctx: &NodeContext<'_>) -> StateUpdate;
}

pub fn node_for(kind: NodeKind) -> &'static dyn StageNode {
    match kind {
        NodeKind::Greeting => &GreetingNode,
        NodeKind::IntentRouter => &IntentRouterNode,
        NodeKind::AddressExtraction => &AddressExtractionNode,
        NodeKind::FrequencyCollection => &FrequencyCollectionNode,
        NodeKind::PropertyLookup => &PropertyLookupNode,
        NodeKind::QuoteCalculation => &QuoteCalculationNode,
        NodeKind::Booking => &BookingNode,
        NodeKind::Closing => &ClosingNode,
    }
}

pub(crate) fn log_fallback(
    state: &ConversationState,
    ctx: &NodeContext<'_>,
    node: NodeKind,
    error: &dyn Display,
) {
    warn!(
        event_name = "conversation.node.fallback",
        correlation_id = ctx.correlation_id,
        call_id = %state.call_id.0,
        tenant_id = %state.tenant_id.0,
        stage = state.stage.as_str(),
        node = node.as_str(),
        error = %error,
        "node failure converted to a spoken fallback"
    );
}

/// "a", "a or b", "a, b, or c".
pub(crate) fn spoken_list(items: &[String], conjunction: &str) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [first, second] => format!("{first} {conjunction} {second}"),
        [init @ .., last] => format!("{}, {conjunction} {last}", init.join(", ")),
    }
}

pub(crate) fn money(amount: Decimal) -> String {
    if amount.fract().is_zero() {
        format!("${}", amount.trunc().normalize())
    } else {
        format!("${:.2}", amount)
    }
}

/// "Tuesday, March 3 at 9:00 AM", in the slot's own offset.
pub(crate) fn spoken_time(time: &DateTime<FixedOffset>) -> String {
    time.format("%A, %B %-d at %-I:%M %p").to_string()
}

pub(crate) fn square_feet(value: u32) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use callquote_core::config::ConversationConfig;
    use callquote_core::domain::conversation::{CallId, ConversationState};
    use callquote_core::domain::tenant::TenantProfile;
    use callquote_core::flows::Stage;
    use callquote_db::demo_tenant;
    use chrono::{DateTime, FixedOffset, Utc};

    use super::NodeContext;
    use crate::conversation::RuleBasedLanguageModel;
    use crate::extraction::Extractor;
    use crate::llm::LanguageModel;
    use crate::runtime::FixedClock;
    use crate::tools::local::{weekday_slots, LocalToolSet};
    use crate::tools::{BusinessTools, ToolGateway};

    /// Monday 2026-03-02, 9:00 in Dallas.
    pub fn monday_morning() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00-06:00")
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    pub fn dallas(time: DateTime<Utc>) -> DateTime<FixedOffset> {
        time.with_timezone(&FixedOffset::west_opt(6 * 3600).expect("valid offset"))
    }

    pub fn local_tools() -> LocalToolSet {
        LocalToolSet::new(demo_tenant())
            .with_lot("1200 Main Street", 8_200)
            .with_lot("77 Ranch Road", 65_000)
            .serving_zip_prefix("752")
            .with_slots(weekday_slots(dallas(monday_morning()), 14, &[9, 14]))
    }

    pub struct Harness {
        pub extractor: Extractor,
        pub tools: BusinessTools,
        pub tenant: Option<TenantProfile>,
        pub tenant_lookup_failed: bool,
        pub clock: FixedClock,
        pub settings: ConversationConfig,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::with_gateway(Arc::new(local_tools().into_registry()))
        }

        pub fn with_gateway(gateway: Arc<dyn ToolGateway>) -> Self {
            Self {
                extractor: Extractor::new(Arc::new(RuleBasedLanguageModel::new()), Duration::from_secs(1)),
                tools: BusinessTools::new(gateway, Duration::from_secs(1)),
                tenant: Some(demo_tenant()),
                tenant_lookup_failed: false,
                clock: FixedClock(monday_morning()),
                settings: ConversationConfig::default(),
            }
        }

        pub fn with_model(mut self, model: impl LanguageModel + 'static) -> Self {
            self.extractor = Extractor::new(Arc::new(model), Duration::from_millis(200));
            self
        }

        pub fn context(&self) -> NodeContext<'_> {
            NodeContext {
                extractor: &self.extractor,
                tools: &self.tools,
                tenant: self.tenant.as_ref(),
                tenant_lookup_failed: self.tenant_lookup_failed,
                clock: &self.clock,
                settings: &self.settings,
                correlation_id: "test-correlation",
            }
        }

        pub fn state(&self, stage: Stage, utterance: &str) -> ConversationState {
            let mut state = ConversationState::new(
                CallId("CA-test".to_string()),
                demo_tenant().tenant_id,
                Some("+12145550123".to_string()),
                monday_morning(),
            );
            state.has_greeted = stage != Stage::Greeting;
            state.stage = stage;
            state.push_user(utterance);
            state
        }
    }
}
