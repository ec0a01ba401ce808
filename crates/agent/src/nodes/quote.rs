use async_trait::async_trait;
use callquote_core::domain::conversation::{
    CallbackRequest, ClosingReason, ConversationState, PropertyData, QuoteAmount, QuoteDetails,
    StateUpdate,
};
use callquote_core::flows::{NodeKind, Stage};
use tracing::info;

use super::{log_fallback, money, spoken_list, square_feet, NodeContext, StageNode};
use crate::tools::QuoteOutcome;

const BOOKING_QUESTION: &str = "Would you like me to get you on the schedule?";
const CUSTOM_QUOTE: &str =
    "That's a larger property than our standard pricing covers, so it needs a custom quote.";

/// Past this point any tool failure ends the call: a guessed price is worse than none.
pub struct QuoteCalculationNode;

#[async_trait]
impl StageNode for QuoteCalculationNode {
    fn kind(&self) -> NodeKind {
        NodeKind::QuoteCalculation
    }

    async fn run(&self, state: &ConversationState, ctx: &NodeContext<'_>) -> StateUpdate {
        // Resumed after asking a large-lot caller for a callback number.
        if let Some(pending) = state
            .callback
            .as_ref()
            .filter(|callback| callback.phone.is_none() && state.closing_reason.is_none())
        {
            let phone = callback_number(state.latest_user_utterance());
            if phone.is_none() {
                log_fallback(state, ctx, self.kind(), &"no callback number in the reply");
            }
            return StateUpdate::close(pending.reason)
                .with_callback(CallbackRequest { phone, ..pending.clone() });
        }

        let (Some(address), Some(frequency)) = (&state.customer_address, state.preferred_frequency)
        else {
            log_fallback(state, ctx, self.kind(), &"quote requested without address or frequency");
            return StateUpdate::close(ClosingReason::QuoteUnavailable);
        };

        match ctx.tools.validate_service_area(&state.tenant_id, address).await {
            Ok(true) => {}
            Ok(false) => {
                info!(
                    event_name = "conversation.quote.out_of_area",
                    correlation_id = ctx.correlation_id,
                    call_id = %state.call_id.0,
                    tenant_id = %state.tenant_id.0,
                    zip = %address.zip,
                    "address outside the service area"
                );
                return StateUpdate::close(ClosingReason::OutOfServiceArea).with_callback(
                    CallbackRequest {
                        phone: state.customer_phone.clone(),
                        reason: ClosingReason::OutOfServiceArea,
                        note: format!("Outside service area, keep for expansion: {}", address.one_line()),
                    },
                );
            }
            Err(error) => {
                log_fallback(state, ctx, self.kind(), &error);
                return StateUpdate::close(ClosingReason::QuoteUnavailable);
            }
        }

        let inclusions =
            ctx.tenant.map(|tenant| tenant.services.clone()).unwrap_or_default();

        let Some(property) = &state.property_data else {
            return match ctx.tools.get_generic_price_range(&state.tenant_id).await {
                Ok((min, max)) => {
                    let quote = QuoteDetails {
                        amount: QuoteAmount::Range { min, max },
                        frequency,
                        inclusions,
                        tier: None,
                    };
                    StateUpdate {
                        quote: Some(quote),
                        ..StateUpdate::to(Stage::WaitingForBookingDecision).say(format!(
                            "I couldn't pull up the lot size for that address, but {} service usually \
                             runs between {} and {} per visit depending on the yard. We'd confirm the \
                             exact price at the first visit. {BOOKING_QUESTION}",
                            frequency.spoken(),
                            money(min),
                            money(max)
                        ))
                    }
                }
                Err(error) => {
                    log_fallback(state, ctx, self.kind(), &error);
                    StateUpdate::close(ClosingReason::QuoteUnavailable)
                }
            };
        };

        let largest = ctx.tenant.and_then(|tenant| tenant.largest_tier_sqft());
        if largest.is_some_and(|largest| property.lot_size_sqft > largest) {
            return large_lot(state, property);
        }

        match ctx.tools.calculate_quote(&state.tenant_id, property.lot_size_sqft, frequency).await {
            Ok(QuoteOutcome::Priced(mut quote)) => {
                if quote.inclusions.is_empty() {
                    quote.inclusions = inclusions;
                }
                let price = match &quote.amount {
                    QuoteAmount::Fixed { price } => money(*price),
                    QuoteAmount::Range { min, max } => format!("{} to {}", money(*min), money(*max)),
                };
                let mut message = format!(
                    "For a lot of about {} square feet, {} service is {} per visit.",
                    square_feet(property.lot_size_sqft),
                    frequency.spoken(),
                    price
                );
                if !quote.inclusions.is_empty() {
                    message.push_str(&format!(
                        " That includes {}.",
                        spoken_list(&quote.inclusions, "and")
                    ));
                }
                message.push(' ');
                message.push_str(BOOKING_QUESTION);

                StateUpdate {
                    quote: Some(quote),
                    ..StateUpdate::to(Stage::WaitingForBookingDecision).say(message)
                }
            }
            Ok(QuoteOutcome::NoMatchingTier) => large_lot(state, property),
            Err(error) => {
                log_fallback(state, ctx, self.kind(), &error);
                StateUpdate::close(ClosingReason::QuoteUnavailable)
            }
        }
    }
}

/// Without a caller id the call pauses once to collect a callback number.
fn large_lot(state: &ConversationState, property: &PropertyData) -> StateUpdate {
    let callback = CallbackRequest {
        phone: state.customer_phone.clone(),
        reason: ClosingReason::CustomQuoteRequired,
        note: format!(
            "Lot of {} sq ft is above the largest pricing tier",
            square_feet(property.lot_size_sqft)
        ),
    };
    if state.customer_phone.is_none() {
        return StateUpdate::to(Stage::WaitingForCallbackNumber)
            .say(format!("{CUSTOM_QUOTE} What's the best number for us to call you back on?"))
            .with_callback(callback);
    }
    StateUpdate::close(ClosingReason::CustomQuoteRequired).with_callback(callback)
}

/// A ten-digit US number, with or without the leading 1, as `+1XXXXXXXXXX`.
fn callback_number(utterance: &str) -> Option<String> {
    let digits: String = utterance.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        10 => Some(format!("+1{digits}")),
        11 if digits.starts_with('1') => Some(format!("+{digits}")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use callquote_core::domain::conversation::{
        ClosingReason, ConversationState, CustomerAddress, PropertyData, QuoteAmount,
        ServiceFrequency,
    };
    use callquote_core::flows::Stage;
    use rust_decimal::Decimal;

    use super::QuoteCalculationNode;
    use crate::nodes::testing::{local_tools, Harness};
    use crate::nodes::StageNode;
    use crate::tools::local::RecordingGateway;

    fn quoting_state(harness: &Harness, zip: &str, lot: Option<u32>) -> ConversationState {
        let mut state = harness.state(Stage::Quoting, "weekly");
        state.customer_address = Some(CustomerAddress {
            street: "1200 Main Street".to_string(),
            city: "Dallas".to_string(),
            state: "TX".to_string(),
            zip: zip.to_string(),
        });
        state.preferred_frequency = Some(ServiceFrequency::Weekly);
        state.property_data = lot.map(|lot_size_sqft| PropertyData { lot_size_sqft, parcel_id: None });
        state
    }

    fn recording_harness() -> (Harness, Arc<Mutex<Vec<String>>>) {
        let gateway = RecordingGateway::new(local_tools().into_registry());
        let log = gateway.call_log();
        (Harness::with_gateway(Arc::new(gateway)), log)
    }

    #[tokio::test]
    async fn known_lot_gets_a_concrete_price() {
        let harness = Harness::new();
        let state = quoting_state(&harness, "75202", Some(8_200));

        let update = QuoteCalculationNode.run(&state, &harness.context()).await;

        assert_eq!(update.stage, Some(Stage::WaitingForBookingDecision));
        let quote = update.quote.expect("quote");
        assert_eq!(quote.fixed_price(), Some(Decimal::new(45, 0)));
        assert_eq!(quote.tier.as_deref(), Some("medium"));
        assert!(update.messages[0].content.contains("weekly service is $45 per visit"));
        assert!(update.messages[0].content.contains("8,200 square feet"));
    }

    #[tokio::test]
    async fn unknown_lot_quotes_a_range() {
        let harness = Harness::new();
        let state = quoting_state(&harness, "75202", None);

        let update = QuoteCalculationNode.run(&state, &harness.context()).await;

        assert_eq!(update.stage, Some(Stage::WaitingForBookingDecision));
        assert_eq!(
            update.quote.map(|q| q.amount),
            Some(QuoteAmount::Range { min: Decimal::new(35, 0), max: Decimal::new(125, 0) })
        );
        assert!(update.messages[0].content.contains("between $35 and $125"));
    }

    #[tokio::test]
    async fn out_of_area_closes_without_calling_pricing() {
        let (harness, log) = recording_harness();
        let state = quoting_state(&harness, "10001", Some(8_200));

        let update = QuoteCalculationNode.run(&state, &harness.context()).await;

        assert_eq!(update.closing_reason, Some(ClosingReason::OutOfServiceArea));
        assert_eq!(update.callback.and_then(|c| c.phone).as_deref(), Some("+12145550123"));
        let calls = log.lock().expect("log").clone();
        assert_eq!(calls, vec!["business.validate_service_area".to_string()]);
    }

    #[tokio::test]
    async fn lot_above_every_tier_never_gets_a_number() {
        let (harness, log) = recording_harness();
        let state = quoting_state(&harness, "75202", Some(65_000));

        let update = QuoteCalculationNode.run(&state, &harness.context()).await;

        assert_eq!(update.stage, Some(Stage::Closing));
        assert_eq!(update.closing_reason, Some(ClosingReason::CustomQuoteRequired));
        assert!(update.quote.is_none());
        assert!(update.messages.iter().all(|m| !m.content.contains('$')));
        assert!(update.callback.is_some());
        assert!(!log.lock().expect("log").iter().any(|call| call == "business.calculate_quote"));
    }

    #[tokio::test]
    async fn no_matching_tier_from_the_tool_takes_the_large_lot_branch() {
        let mut harness = Harness::new();
        // Without tenant tiers the local pre-check cannot fire; the tool decides.
        if let Some(tenant) = harness.tenant.as_mut() {
            tenant.pricing_tiers.clear();
        }
        let state = quoting_state(&harness, "75202", Some(65_000));

        let update = QuoteCalculationNode.run(&state, &harness.context()).await;

        assert_eq!(update.closing_reason, Some(ClosingReason::CustomQuoteRequired));
    }

    #[tokio::test]
    async fn large_lot_without_caller_id_asks_for_a_callback_number() {
        let (harness, log) = recording_harness();
        let mut state = quoting_state(&harness, "75202", Some(65_000));
        state.customer_phone = None;

        let update = QuoteCalculationNode.run(&state, &harness.context()).await;
        assert_eq!(update.stage, Some(Stage::WaitingForCallbackNumber));
        assert!(update.messages[0].content.ends_with("What's the best number for us to call you back on?"));
        assert_eq!(update.callback.as_ref().and_then(|c| c.phone.clone()), None);
        assert!(!log.lock().expect("log").iter().any(|call| call == "business.calculate_quote"));

        state.apply(update);
        state.stage = Stage::Quoting;
        state.push_user("Sure, it's 214-555-0188");
        let resumed = QuoteCalculationNode.run(&state, &harness.context()).await;

        assert_eq!(resumed.stage, Some(Stage::Closing));
        assert_eq!(resumed.closing_reason, Some(ClosingReason::CustomQuoteRequired));
        assert_eq!(resumed.callback.and_then(|c| c.phone).as_deref(), Some("+12145550188"));
    }

    #[test]
    fn callback_numbers_are_normalised() {
        assert_eq!(super::callback_number("(214) 555-0188").as_deref(), Some("+12145550188"));
        assert_eq!(super::callback_number("1 214 555 0188").as_deref(), Some("+12145550188"));
        assert_eq!(super::callback_number("call me tomorrow"), None);
        assert_eq!(super::callback_number("555-0188"), None);
    }
}
