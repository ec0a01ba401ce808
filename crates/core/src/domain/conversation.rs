use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::tenant::TenantId;
use crate::flows::states::Stage;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

impl CustomerAddress {
    pub fn one_line(&self) -> String {
        format!("{}, {}, {} {}", self.street, self.city, self.state, self.zip)
    }
}

/// Address fields gathered so far while the caller is still being asked for the rest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialAddress {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

impl PartialAddress {
    /// Takes every non-blank field from `newer`, so a caller can correct an
    /// earlier answer. Blank fields leave what was known.
    pub fn merge(&mut self, newer: &PartialAddress) {
        fn fill(slot: &mut Option<String>, value: &Option<String>) {
            if let Some(value) = value.as_ref().map(|v| v.trim()).filter(|v| !v.is_empty()) {
                *slot = Some(value.to_string());
            }
        }

        fill(&mut self.street, &newer.street);
        fill(&mut self.city, &newer.city);
        fill(&mut self.state, &newer.state);
        fill(&mut self.zip, &newer.zip);
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.street.is_none() {
            missing.push("street address");
        }
        if self.city.is_none() {
            missing.push("city");
        }
        if self.state.is_none() {
            missing.push("state");
        }
        if self.zip.is_none() {
            missing.push("zip code");
        }
        missing
    }

    pub fn complete(&self) -> Option<CustomerAddress> {
        Some(CustomerAddress {
            street: self.street.clone()?,
            city: self.city.clone()?,
            state: self.state.clone()?,
            zip: self.zip.clone()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.street.is_none() && self.city.is_none() && self.state.is_none() && self.zip.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyData {
    pub lot_size_sqft: u32,
    pub parcel_id: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceFrequency {
    Weekly,
    Biweekly,
    Monthly,
    OneTime,
}

impl ServiceFrequency {
    pub const ALL: [ServiceFrequency; 4] =
        [Self::Weekly, Self::Biweekly, Self::Monthly, Self::OneTime];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Biweekly => "biweekly",
            Self::Monthly => "monthly",
            Self::OneTime => "one_time",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "weekly" => Some(Self::Weekly),
            "biweekly" | "bi_weekly" => Some(Self::Biweekly),
            "monthly" => Some(Self::Monthly),
            "one_time" | "onetime" | "once" => Some(Self::OneTime),
            _ => None,
        }
    }

    /// How the frequency is said out loud.
    pub fn spoken(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Biweekly => "every other week",
            Self::Monthly => "monthly",
            Self::OneTime => "one-time",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuoteAmount {
    Fixed { price: Decimal },
    Range { min: Decimal, max: Decimal },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteDetails {
    pub amount: QuoteAmount,
    pub frequency: ServiceFrequency,
    pub inclusions: Vec<String>,
    pub tier: Option<String>,
}

impl QuoteDetails {
    pub fn fixed_price(&self) -> Option<Decimal> {
        match self.amount {
            QuoteAmount::Fixed { price } => Some(price),
            QuoteAmount::Range { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<FixedOffset>,
    pub end: Option<DateTime<FixedOffset>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDetails {
    pub scheduled_time: DateTime<FixedOffset>,
    pub calendar_event_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosingReason {
    BookingConfirmed,
    BookingDeclined,
    AddressNotUnderstood,
    OutOfServiceArea,
    CustomQuoteRequired,
    NoAvailability,
    BookingFailed,
    QuoteUnavailable,
    ConfigurationError,
}

impl ClosingReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BookingConfirmed => "booking_confirmed",
            Self::BookingDeclined => "booking_declined",
            Self::AddressNotUnderstood => "address_not_understood",
            Self::OutOfServiceArea => "out_of_service_area",
            Self::CustomQuoteRequired => "custom_quote_required",
            Self::NoAvailability => "no_availability",
            Self::BookingFailed => "booking_failed",
            Self::QuoteUnavailable => "quote_unavailable",
            Self::ConfigurationError => "configuration_error",
        }
    }
}

/// Follow-up the business owner has to make by phone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackRequest {
    pub phone: Option<String>,
    pub reason: ClosingReason,
    pub note: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptCounters {
    pub address_extraction: u32,
    pub property_lookup: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub call_id: CallId,
    pub tenant_id: TenantId,
    pub customer_phone: Option<String>,
    pub messages: Vec<Message>,
    pub has_greeted: bool,
    pub stage: Stage,
    pub customer_name: Option<String>,
    #[serde(default)]
    pub partial_address: PartialAddress,
    /// Set once the caller has been asked for the address, so an utterance
    /// that was never an answer does not spend an attempt.
    #[serde(default)]
    pub address_prompted: bool,
    pub customer_address: Option<CustomerAddress>,
    pub property_data: Option<PropertyData>,
    pub preferred_frequency: Option<ServiceFrequency>,
    pub quote: Option<QuoteDetails>,
    #[serde(default)]
    pub offered_slots: Vec<TimeSlot>,
    pub chosen_time: Option<DateTime<FixedOffset>>,
    pub booking: Option<BookingDetails>,
    pub closing_reason: Option<ClosingReason>,
    pub callback: Option<CallbackRequest>,
    #[serde(default)]
    pub attempts: AttemptCounters,
    #[serde(default)]
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(
        call_id: CallId,
        tenant_id: TenantId,
        customer_phone: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            call_id,
            tenant_id,
            customer_phone: customer_phone.filter(|phone| !phone.trim().is_empty()),
            messages: Vec::new(),
            has_greeted: false,
            stage: Stage::Greeting,
            customer_name: None,
            partial_address: PartialAddress::default(),
            address_prompted: false,
            customer_address: None,
            property_data: None,
            preferred_frequency: None,
            quote: None,
            offered_slots: Vec::new(),
            chosen_time: None,
            booking: None,
            closing_reason: None,
            callback: None,
            attempts: AttemptCounters::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push_user(&mut self, utterance: impl Into<String>) {
        self.messages.push(Message::user(utterance));
    }

    pub fn latest_user_utterance(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
            .unwrap_or("")
    }

    pub fn latest_assistant_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
            .map(|message| message.content.as_str())
            .filter(|content| !content.trim().is_empty())
    }

    /// Merges a node's partial update into the record.
    pub fn apply(&mut self, update: StateUpdate) {
        self.messages.extend(update.messages);
        if let Some(stage) = update.stage {
            self.stage = stage;
        }
        if let Some(has_greeted) = update.has_greeted {
            self.has_greeted = has_greeted;
        }
        if self.customer_name.is_none() {
            self.customer_name = update.customer_name;
        }
        if let Some(partial_address) = update.partial_address {
            self.partial_address = partial_address;
        }
        if let Some(address_prompted) = update.address_prompted {
            self.address_prompted = address_prompted;
        }
        if update.customer_address.is_some() {
            self.customer_address = update.customer_address;
        }
        if update.property_data.is_some() {
            self.property_data = update.property_data;
        }
        if update.preferred_frequency.is_some() {
            self.preferred_frequency = update.preferred_frequency;
        }
        if update.quote.is_some() {
            self.quote = update.quote;
        }
        if let Some(offered_slots) = update.offered_slots {
            self.offered_slots = offered_slots;
        }
        if update.chosen_time.is_some() {
            self.chosen_time = update.chosen_time;
        }
        if update.booking.is_some() {
            self.booking = update.booking;
        }
        if update.closing_reason.is_some() {
            self.closing_reason = update.closing_reason;
        }
        if update.callback.is_some() {
            self.callback = update.callback;
        }
        if let Some(attempts) = update.attempts {
            self.attempts = attempts;
        }
    }
}

/// Partial state returned by a stage node. Absent fields leave the record untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateUpdate {
    pub messages: Vec<Message>,
    pub stage: Option<Stage>,
    pub has_greeted: Option<bool>,
    pub customer_name: Option<String>,
    pub partial_address: Option<PartialAddress>,
    pub address_prompted: Option<bool>,
    pub customer_address: Option<CustomerAddress>,
    pub property_data: Option<PropertyData>,
    pub preferred_frequency: Option<ServiceFrequency>,
    pub quote: Option<QuoteDetails>,
    pub offered_slots: Option<Vec<TimeSlot>>,
    pub chosen_time: Option<DateTime<FixedOffset>>,
    pub booking: Option<BookingDetails>,
    pub closing_reason: Option<ClosingReason>,
    pub callback: Option<CallbackRequest>,
    pub attempts: Option<AttemptCounters>,
}

impl StateUpdate {
    pub fn to(stage: Stage) -> Self {
        Self { stage: Some(stage), ..Self::default() }
    }

    /// Moves to `closing` with the reason the closing node renders.
    pub fn close(reason: ClosingReason) -> Self {
        Self { stage: Some(Stage::Closing), closing_reason: Some(reason), ..Self::default() }
    }

    pub fn say(mut self, text: impl Into<String>) -> Self {
        self.messages.push(Message::assistant(text));
        self
    }

    pub fn with_attempts(mut self, attempts: AttemptCounters) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_callback(mut self, callback: CallbackRequest) -> Self {
        self.callback = Some(callback);
        self
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{
        CallId, ConversationState, Message, PartialAddress, Role, StateUpdate,
    };
    use crate::domain::tenant::TenantId;
    use crate::flows::states::Stage;

    fn state() -> ConversationState {
        ConversationState::new(
            CallId("CA-100".to_string()),
            TenantId("green-acres".to_string()),
            Some("+15125550100".to_string()),
            Utc::now(),
        )
    }

    #[test]
    fn new_record_starts_at_greeting_with_zeroed_attempts() {
        let state = state();
        assert_eq!(state.stage, Stage::Greeting);
        assert_eq!(state.attempts.address_extraction, 0);
        assert_eq!(state.attempts.property_lookup, 0);
        assert!(!state.has_greeted);
        assert!(state.messages.is_empty());
    }

    #[test]
    fn apply_appends_messages_and_overwrites_stage() {
        let mut state = state();
        state.push_user("hello");
        state.apply(StateUpdate::to(Stage::IntentRouting).say("Thanks for calling!"));
        state.apply(StateUpdate::to(Stage::WaitingForAddress).say("What's the address?"));

        assert_eq!(state.stage, Stage::WaitingForAddress);
        assert_eq!(state.messages.len(), 3);
        assert_eq!(state.messages[0], Message::user("hello"));
        assert_eq!(state.latest_assistant_message(), Some("What's the address?"));
        assert_eq!(state.latest_user_utterance(), "hello");
    }

    #[test]
    fn a_known_name_is_not_replaced_by_a_later_guess() {
        let mut state = state();
        state.apply(StateUpdate { customer_name: Some("Dana".to_string()), ..StateUpdate::default() });
        state.apply(StateUpdate { customer_name: Some("Main".to_string()), ..StateUpdate::default() });

        assert_eq!(state.customer_name.as_deref(), Some("Dana"));
    }

    #[test]
    fn blank_assistant_messages_do_not_count_as_a_reply() {
        let mut state = state();
        state.messages.push(Message { role: Role::Assistant, content: "  ".to_string() });
        assert_eq!(state.latest_assistant_message(), None);
    }

    #[test]
    fn partial_address_merge_prefers_newer_fields_and_reports_gaps() {
        let mut partial = PartialAddress {
            street: Some("1200 Main Street".to_string()),
            ..PartialAddress::default()
        };
        partial.merge(&PartialAddress {
            street: Some("99 Elm".to_string()),
            city: Some("Dallas".to_string()),
            state: Some(" ".to_string()),
            zip: None,
        });

        assert_eq!(partial.street.as_deref(), Some("99 Elm"));
        assert_eq!(partial.city.as_deref(), Some("Dallas"));
        assert_eq!(partial.missing_fields(), vec!["state", "zip code"]);
        assert!(partial.complete().is_none());
    }

    #[test]
    fn unknown_persisted_stage_decodes_as_unknown() {
        let mut value = serde_json::to_value(state()).expect("serialize state");
        value["stage"] = serde_json::Value::String("SOMETHING_NEW".to_string());

        let decoded: ConversationState = serde_json::from_value(value).expect("decode state");
        assert_eq!(decoded.stage, Stage::Unknown);
    }
}
