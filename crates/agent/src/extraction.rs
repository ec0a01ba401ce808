use std::sync::Arc;
use std::time::Duration;

use callquote_core::domain::conversation::{ConversationState, PartialAddress, Role, ServiceFrequency};
use callquote_core::domain::tenant::TenantProfile;
use chrono::Weekday;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::llm::{strip_json_wrappers, CompletionRequest, LanguageModel, LlmError, TaskKind};

const TRANSCRIPT_WINDOW: usize = 6;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
    #[error("extraction output was malformed: {0}")]
    Malformed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallerIntent {
    GeneralQuestion,
    Introduction,
    BookingIntent,
    Unclear,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractedAddress {
    pub name: Option<String>,
    pub address: PartialAddress,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BookingDecision {
    Accept,
    Decline,
    Unclear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartOfDay {
    Morning,
    Afternoon,
    Evening,
}

impl PartOfDay {
    pub fn contains_hour(&self, hour: u32) -> bool {
        match self {
            Self::Morning => hour < 12,
            Self::Afternoon => (12..17).contains(&hour),
            Self::Evening => hour >= 17,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimePreference {
    pub part_of_day: Option<PartOfDay>,
    pub weekday: Option<Weekday>,
    /// 24-hour clock.
    pub hour: Option<u32>,
    /// 1-based pick among slots that were read back.
    pub option_number: Option<usize>,
}

impl TimePreference {
    pub fn is_empty(&self) -> bool {
        self.part_of_day.is_none()
            && self.weekday.is_none()
            && self.hour.is_none()
            && self.option_number.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BookingReply {
    pub decision: BookingDecision,
    pub time_preference: TimePreference,
    pub wants_options: bool,
}

#[derive(Deserialize)]
struct IntentPayload {
    intent: String,
}

#[derive(Deserialize)]
struct NamePayload {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct AddressPayload {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    street: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    zip: Option<String>,
}

#[derive(Deserialize)]
struct FrequencyPayload {
    #[serde(default)]
    frequency: Option<String>,
}

#[derive(Default, Deserialize)]
struct TimePreferencePayload {
    #[serde(default)]
    part_of_day: Option<String>,
    #[serde(default)]
    weekday: Option<String>,
    #[serde(default)]
    hour: Option<u32>,
    #[serde(default)]
    option_number: Option<usize>,
}

#[derive(Deserialize)]
struct BookingPayload {
    decision: String,
    #[serde(default)]
    time_preference: Option<TimePreferencePayload>,
    #[serde(default)]
    wants_options: bool,
}

#[derive(Deserialize)]
struct AnswerPayload {
    answer: String,
}

/// Typed front for the shared language model. Cheap to clone.
#[derive(Clone)]
pub struct Extractor {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl Extractor {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    pub fn model_name(&self) -> &'static str {
        self.model.name()
    }

    pub async fn classify_intent(
        &self,
        context: &str,
        utterance: &str,
    ) -> Result<CallerIntent, ExtractionError> {
        let payload: IntentPayload = self
            .ask(
                TaskKind::ClassifyIntent,
                context,
                "Classify what the caller wants. Reply with JSON only: \
                 {\"intent\": \"general_question\" | \"introduction\" | \"booking_intent\" | \"unclear\"}. \
                 Asking for a quote or a visit, or saying yes to an offered quote, is booking_intent.",
                utterance,
                Vec::new(),
            )
            .await?;

        Ok(match payload.intent.trim().to_ascii_lowercase().as_str() {
            "general_question" | "question" => CallerIntent::GeneralQuestion,
            "introduction" | "small_talk" => CallerIntent::Introduction,
            "booking_intent" | "booking" | "quote" => CallerIntent::BookingIntent,
            _ => CallerIntent::Unclear,
        })
    }

    pub async fn extract_name(
        &self,
        context: &str,
        utterance: &str,
    ) -> Result<Option<String>, ExtractionError> {
        let payload: NamePayload = self
            .ask(
                TaskKind::ExtractName,
                context,
                "Extract the caller's first name if they said it. \
                 Reply with JSON only: {\"name\": string | null}.",
                utterance,
                Vec::new(),
            )
            .await?;
        Ok(clean(payload.name))
    }

    pub async fn extract_address(
        &self,
        context: &str,
        utterance: &str,
    ) -> Result<ExtractedAddress, ExtractionError> {
        let payload: AddressPayload = self
            .ask(
                TaskKind::ExtractAddress,
                context,
                "Extract the caller's name and property address. Use null for anything not said. \
                 State is the two-letter abbreviation. Reply with JSON only: \
                 {\"name\": ..., \"street\": ..., \"city\": ..., \"state\": ..., \"zip\": ...}.",
                utterance,
                Vec::new(),
            )
            .await?;

        Ok(ExtractedAddress {
            name: clean(payload.name),
            address: PartialAddress {
                street: clean(payload.street),
                city: clean(payload.city),
                state: clean(payload.state).map(|state| state.to_ascii_uppercase()),
                zip: clean(payload.zip),
            },
        })
    }

    /// Only a frequency from `supported` is ever returned.
    pub async fn extract_frequency(
        &self,
        context: &str,
        utterance: &str,
        supported: &[ServiceFrequency],
    ) -> Result<Option<ServiceFrequency>, ExtractionError> {
        let options: Vec<String> = supported.iter().map(|f| f.as_str().to_string()).collect();
        let instructions = format!(
            "Which service frequency did the caller choose? Allowed values: {}. \
             Reply with JSON only: {{\"frequency\": one of the allowed values | null}}.",
            options.join(", ")
        );
        let payload: FrequencyPayload = self
            .ask(TaskKind::ExtractFrequency, context, &instructions, utterance, options)
            .await?;

        Ok(payload
            .frequency
            .as_deref()
            .and_then(ServiceFrequency::parse)
            .filter(|frequency| supported.contains(frequency)))
    }

    pub async fn classify_booking_reply(
        &self,
        context: &str,
        utterance: &str,
    ) -> Result<BookingReply, ExtractionError> {
        let payload: BookingPayload = self
            .ask(
                TaskKind::ClassifyBookingReply,
                context,
                "The caller was offered an appointment. Reply with JSON only: \
                 {\"decision\": \"accept\" | \"decline\" | \"unclear\", \
                 \"time_preference\": {\"part_of_day\": \"morning\" | \"afternoon\" | \"evening\" | null, \
                 \"weekday\": \"monday\"..\"sunday\" | null, \"hour\": 0-23 | null, \
                 \"option_number\": 1-based choice among times read back | null}, \
                 \"wants_options\": true if they asked which times are open}.",
                utterance,
                Vec::new(),
            )
            .await?;

        let decision = match payload.decision.trim().to_ascii_lowercase().as_str() {
            "accept" | "yes" => BookingDecision::Accept,
            "decline" | "no" => BookingDecision::Decline,
            _ => BookingDecision::Unclear,
        };
        let preference = payload.time_preference.unwrap_or_default();
        let time_preference = TimePreference {
            part_of_day: preference.part_of_day.as_deref().and_then(|value| {
                match value.trim().to_ascii_lowercase().as_str() {
                    "morning" => Some(PartOfDay::Morning),
                    "afternoon" => Some(PartOfDay::Afternoon),
                    "evening" => Some(PartOfDay::Evening),
                    _ => None,
                }
            }),
            weekday: preference.weekday.as_deref().and_then(|value| value.trim().parse().ok()),
            hour: preference.hour.filter(|hour| *hour < 24),
            option_number: preference.option_number.filter(|number| *number > 0),
        };

        Ok(BookingReply { decision, time_preference, wants_options: payload.wants_options })
    }

    /// Short spoken answer grounded in the business facts carried by `context`.
    pub async fn answer_question(
        &self,
        context: &str,
        utterance: &str,
    ) -> Result<String, ExtractionError> {
        let payload: AnswerPayload = self
            .ask(
                TaskKind::AnswerQuestion,
                context,
                "Answer the caller's question in one or two short spoken sentences using only \
                 the business facts above. Never invent a price. \
                 Reply with JSON only: {\"answer\": string}.",
                utterance,
                Vec::new(),
            )
            .await?;

        clean(Some(payload.answer))
            .ok_or_else(|| ExtractionError::Malformed("empty answer".to_string()))
    }

    async fn ask<T: DeserializeOwned>(
        &self,
        task: TaskKind,
        context: &str,
        instructions: &str,
        utterance: &str,
        options: Vec<String>,
    ) -> Result<T, ExtractionError> {
        let request = CompletionRequest {
            task,
            system: context.to_string(),
            instructions: instructions.to_string(),
            utterance: utterance.to_string(),
            options,
        };

        let raw = tokio::time::timeout(self.timeout, self.model.complete(&request))
            .await
            .map_err(|_| ExtractionError::Timeout(self.timeout))??;

        let json = strip_json_wrappers(&raw).ok_or_else(|| {
            ExtractionError::Malformed(format!("{} returned no JSON object", task.as_str()))
        })?;
        serde_json::from_str(json)
            .map_err(|error| ExtractionError::Malformed(format!("{}: {error}", task.as_str())))
    }
}

/// Business facts plus the tail of the transcript, handed to every extraction call.
pub fn system_context(tenant: Option<&TenantProfile>, state: &ConversationState) -> String {
    let mut context = String::from(
        "You are the phone receptionist for a lawn and home service business.\n",
    );
    match tenant {
        Some(tenant) => context.push_str(&tenant.fact_sheet()),
        None => context.push_str("Business details are unavailable.\n"),
    }

    let skip = state.messages.len().saturating_sub(TRANSCRIPT_WINDOW);
    let recent: Vec<String> = state
        .messages
        .iter()
        .skip(skip)
        .filter(|message| message.role != Role::System)
        .map(|message| {
            let speaker = if message.role == Role::User { "Caller" } else { "Agent" };
            format!("{speaker}: {}", message.content)
        })
        .collect();
    if !recent.is_empty() {
        context.push_str("\nRecent conversation:\n");
        context.push_str(&recent.join("\n"));
    }
    context
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty() && !value.eq_ignore_ascii_case("null"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use callquote_core::domain::conversation::ServiceFrequency;
    use chrono::Weekday;

    use super::{BookingDecision, CallerIntent, ExtractionError, Extractor, PartOfDay};
    use crate::llm::{CompletionRequest, LanguageModel, LlmError};

    struct Canned(&'static str);

    #[async_trait]
    impl LanguageModel for Canned {
        fn name(&self) -> &'static str {
            "canned"
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
            Ok(self.0.to_string())
        }
    }

    struct Stalled;

    #[async_trait]
    impl LanguageModel for Stalled {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("{}".to_string())
        }
    }

    fn extractor(model: impl LanguageModel + 'static) -> Extractor {
        Extractor::new(Arc::new(model), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn fenced_address_is_decoded_and_state_uppercased() {
        let extractor = extractor(Canned(
            "```json\n{\"name\": \"Dana\", \"street\": \"1200 Main Street\", \"city\": \"Dallas\", \
             \"state\": \"tx\", \"zip\": \"75202\"}\n```",
        ));
        let extracted = extractor.extract_address("", "").await.expect("address");

        assert_eq!(extracted.name.as_deref(), Some("Dana"));
        assert_eq!(extracted.address.state.as_deref(), Some("TX"));
        assert!(extracted.address.complete().is_some());
    }

    #[tokio::test]
    async fn null_like_fields_stay_missing() {
        let extractor = extractor(Canned(
            "{\"street\": \"1200 Main Street\", \"city\": \"null\", \"state\": \"\", \"zip\": null}",
        ));
        let extracted = extractor.extract_address("", "").await.expect("address");

        assert_eq!(extracted.address.missing_fields(), vec!["city", "state", "zip code"]);
    }

    #[tokio::test]
    async fn prose_without_json_is_malformed_not_a_panic() {
        let extractor = extractor(Canned("I think they live on Main Street."));
        let error = extractor.extract_address("", "").await.expect_err("malformed");
        assert!(matches!(error, ExtractionError::Malformed(_)));

        let extractor = self::extractor(Canned("{\"intent\": 7}"));
        let error = extractor.classify_intent("", "").await.expect_err("malformed");
        assert!(matches!(error, ExtractionError::Malformed(_)));
    }

    #[tokio::test]
    async fn unknown_intent_label_is_unclear() {
        let extractor = extractor(Canned("{\"intent\": \"complaint\"}"));
        assert_eq!(extractor.classify_intent("", "").await.expect("intent"), CallerIntent::Unclear);
    }

    #[tokio::test]
    async fn frequency_outside_supported_set_is_dropped() {
        let extractor = extractor(Canned("{\"frequency\": \"monthly\"}"));
        let supported = [ServiceFrequency::Weekly, ServiceFrequency::Biweekly];
        assert_eq!(extractor.extract_frequency("", "", &supported).await.expect("frequency"), None);

        let extractor = self::extractor(Canned("{\"frequency\": \"bi-weekly\"}"));
        assert_eq!(
            extractor.extract_frequency("", "", &supported).await.expect("frequency"),
            Some(ServiceFrequency::Biweekly)
        );
    }

    #[tokio::test]
    async fn booking_reply_decodes_time_preference() {
        let extractor = extractor(Canned(
            "{\"decision\": \"accept\", \"time_preference\": {\"part_of_day\": \"Morning\", \
             \"weekday\": \"tuesday\", \"hour\": 31, \"option_number\": 0}}",
        ));
        let reply = extractor.classify_booking_reply("", "").await.expect("reply");

        assert_eq!(reply.decision, BookingDecision::Accept);
        assert_eq!(reply.time_preference.part_of_day, Some(PartOfDay::Morning));
        assert_eq!(reply.time_preference.weekday, Some(Weekday::Tue));
        assert_eq!(reply.time_preference.hour, None);
        assert_eq!(reply.time_preference.option_number, None);
        assert!(!reply.wants_options);
    }

    #[tokio::test]
    async fn slow_model_times_out() {
        let extractor = extractor(Stalled);
        let error = extractor.extract_name("", "").await.expect_err("timeout");
        assert!(matches!(error, ExtractionError::Timeout(_)));
    }
}
