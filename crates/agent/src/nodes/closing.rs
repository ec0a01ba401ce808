use async_trait::async_trait;
use callquote_core::domain::conversation::{ClosingReason, ConversationState, QuoteAmount, StateUpdate};
use callquote_core::flows::{NodeKind, Stage};

use super::{money, spoken_time, NodeContext, StageNode};

pub struct ClosingNode;

#[async_trait]
impl StageNode for ClosingNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Closing
    }

    async fn run(&self, state: &ConversationState, ctx: &NodeContext<'_>) -> StateUpdate {
        let message = match state.closing_reason {
            Some(reason) => reason_message(reason, state, ctx),
            None => general_goodbye(state, ctx),
        };
        StateUpdate::to(Stage::End).say(message)
    }
}

fn reason_message(reason: ClosingReason, state: &ConversationState, ctx: &NodeContext<'_>) -> String {
    let thanks = thanks(ctx);
    let follow_up = follow_up(state, ctx);
    match reason {
        ClosingReason::BookingConfirmed => match &state.booking {
            Some(booking) => format!(
                "You're all set for {}. Your confirmation number is {}. {thanks}",
                spoken_time(&booking.scheduled_time),
                booking.calendar_event_id
            ),
            None => format!("You're all set. {thanks}"),
        },
        ClosingReason::BookingDeclined => match ctx.business_phone() {
            Some(phone) => format!(
                "No problem at all. Whenever you're ready, give us a call at {phone}. {thanks}"
            ),
            None => format!("No problem at all. Whenever you're ready, just give us a call. {thanks}"),
        },
        ClosingReason::AddressNotUnderstood => format!(
            "I'm sorry, I'm having trouble getting the address over the phone. {follow_up} {thanks}"
        ),
        ClosingReason::OutOfServiceArea => format!(
            "Unfortunately that address is outside our service area right now. \
             We've kept your details in case we expand to your area. {thanks}"
        ),
        // Without a caller id the custom-quote explanation came with the number request.
        ClosingReason::CustomQuoteRequired if state.customer_phone.is_none() => {
            format!("Thanks. {follow_up} {thanks}")
        }
        ClosingReason::CustomQuoteRequired => format!(
            "That's a larger property than our standard pricing covers, so it needs a custom quote. \
             {follow_up} {thanks}"
        ),
        ClosingReason::NoAvailability => format!(
            "I don't see any open times in the next couple of weeks. {follow_up} {thanks}"
        ),
        ClosingReason::BookingFailed => format!(
            "I wasn't able to confirm that appointment just now. {follow_up} {thanks}"
        ),
        ClosingReason::QuoteUnavailable => format!(
            "I'm not able to pull up a quote for you right now. {follow_up} {thanks}"
        ),
        ClosingReason::ConfigurationError => format!(
            "I'm sorry, I can't put together a quote over the phone right now. {follow_up} {thanks}"
        ),
    }
}

fn general_goodbye(state: &ConversationState, ctx: &NodeContext<'_>) -> String {
    let quoted = state.quote.as_ref().map(|quote| match quote.amount {
        QuoteAmount::Fixed { price } => format!("{} per visit", money(price)),
        QuoteAmount::Range { min, max } => format!("{} to {} per visit", money(min), money(max)),
    });
    match quoted {
        Some(quoted) => format!(
            "Your quote of {quoted} is on file, so just call us when you're ready to book. {}",
            thanks(ctx)
        ),
        None => thanks(ctx),
    }
}

fn thanks(ctx: &NodeContext<'_>) -> String {
    match ctx.business_name() {
        Some(name) => format!("Thanks for calling {name}, have a great day!"),
        None => "Thanks for calling, have a great day!".to_string(),
    }
}

/// Who calls whom next, depending on what we know.
fn follow_up(state: &ConversationState, ctx: &NodeContext<'_>) -> String {
    let team = match ctx.business_name() {
        Some(name) => format!("Someone from {name}"),
        None => "Someone from our team".to_string(),
    };
    let collected = state.callback.as_ref().and_then(|callback| callback.phone.as_deref());
    match (&state.customer_phone, collected, ctx.business_phone()) {
        (Some(_), _, _) => format!("{team} will call you back at this number."),
        (None, Some(number), _) => format!("{team} will call you back at {number}."),
        (None, None, Some(phone)) => {
            format!("Please give us a call back at {phone} and we'll take care of you.")
        }
        (None, None, None) => {
            format!("{team} will be glad to help if you call back during business hours.")
        }
    }
}

#[cfg(test)]
mod tests {
    use callquote_core::domain::conversation::{
        BookingDetails, CallbackRequest, ClosingReason, QuoteAmount, QuoteDetails, ServiceFrequency,
    };
    use callquote_core::flows::Stage;
    use chrono::DateTime;
    use rust_decimal::Decimal;

    use super::ClosingNode;
    use crate::nodes::testing::Harness;
    use crate::nodes::StageNode;

    #[tokio::test]
    async fn confirmation_reads_back_time_and_event_id() {
        let harness = Harness::new();
        let mut state = harness.state(Stage::Closing, "yes");
        state.closing_reason = Some(ClosingReason::BookingConfirmed);
        state.booking = Some(BookingDetails {
            scheduled_time: DateTime::parse_from_rfc3339("2026-03-03T09:00:00-06:00").expect("time"),
            calendar_event_id: "evt-0001".to_string(),
        });

        let update = ClosingNode.run(&state, &harness.context()).await;

        assert_eq!(update.stage, Some(Stage::End));
        let spoken = &update.messages[0].content;
        assert!(spoken.contains("Tuesday, March 3 at 9:00 AM"), "{spoken}");
        assert!(spoken.contains("evt-0001"));
        assert!(spoken.contains("Green Acres"));
    }

    #[tokio::test]
    async fn every_reason_gets_a_goodbye_without_a_tenant() {
        let mut harness = Harness::new();
        harness.tenant = None;
        for reason in [
            ClosingReason::BookingDeclined,
            ClosingReason::AddressNotUnderstood,
            ClosingReason::OutOfServiceArea,
            ClosingReason::CustomQuoteRequired,
            ClosingReason::NoAvailability,
            ClosingReason::BookingFailed,
            ClosingReason::QuoteUnavailable,
            ClosingReason::ConfigurationError,
        ] {
            let mut state = harness.state(Stage::Closing, "ok");
            state.closing_reason = Some(reason);
            let update = ClosingNode.run(&state, &harness.context()).await;

            assert_eq!(update.stage, Some(Stage::End));
            assert!(update.messages[0].content.ends_with("Thanks for calling, have a great day!"));
        }
    }

    #[tokio::test]
    async fn plain_goodbye_mentions_a_given_quote() {
        let harness = Harness::new();
        let mut state = harness.state(Stage::Closing, "bye");
        state.quote = Some(QuoteDetails {
            amount: QuoteAmount::Fixed { price: Decimal::new(45, 0) },
            frequency: ServiceFrequency::Weekly,
            inclusions: Vec::new(),
            tier: None,
        });

        let update = ClosingNode.run(&state, &harness.context()).await;
        assert!(update.messages[0].content.starts_with("Your quote of $45 per visit is on file"));
    }

    #[tokio::test]
    async fn collected_callback_number_is_read_back() {
        let harness = Harness::new();
        let mut state = harness.state(Stage::Closing, "214-555-0188");
        state.customer_phone = None;
        state.closing_reason = Some(ClosingReason::CustomQuoteRequired);
        state.callback = Some(CallbackRequest {
            phone: Some("+12145550188".to_string()),
            reason: ClosingReason::CustomQuoteRequired,
            note: "Lot of 65,000 sq ft is above the largest pricing tier".to_string(),
        });

        let update = ClosingNode.run(&state, &harness.context()).await;

        assert_eq!(
            update.messages[0].content,
            "Thanks. Someone from Green Acres Lawn Care will call you back at +12145550188. \
             Thanks for calling Green Acres Lawn Care, have a great day!"
        );
    }
}
