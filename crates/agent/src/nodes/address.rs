use async_trait::async_trait;
use callquote_core::domain::conversation::{ClosingReason, ConversationState, StateUpdate};
use callquote_core::flows::{NodeKind, Stage};

use super::intent::ADDRESS_PROMPT;
use super::{log_fallback, spoken_list, NodeContext, StageNode};

/// Accumulates address fields across turns until street, city, state and zip
/// are all known.
pub struct AddressExtractionNode;

#[async_trait]
impl StageNode for AddressExtractionNode {
    fn kind(&self) -> NodeKind {
        NodeKind::AddressExtraction
    }

    async fn run(&self, state: &ConversationState, ctx: &NodeContext<'_>) -> StateUpdate {
        if state.customer_address.is_some() {
            return StateUpdate::to(Stage::FrequencyCollection);
        }

        let extracted = match ctx
            .extractor
            .extract_address(&ctx.system_context(state), state.latest_user_utterance())
            .await
        {
            Ok(extracted) => Some(extracted),
            Err(error) => {
                log_fallback(state, ctx, self.kind(), &error);
                None
            }
        };

        let mut partial = state.partial_address.clone();
        let mut name = None;
        if let Some(extracted) = extracted {
            partial.merge(&extracted.address);
            name = extracted.name;
        }
        let mut attempts = state.attempts;

        if let Some(address) = partial.complete() {
            attempts.address_extraction = 0;
            let mut update = StateUpdate::to(Stage::FrequencyCollection)
                .say(format!("Perfect, I have {}.", address.one_line()))
                .with_attempts(attempts);
            update.customer_address = Some(address);
            update.partial_address = Some(partial);
            update.customer_name = name;
            return update;
        }

        let gained = partial != state.partial_address;
        if !state.address_prompted && !gained {
            // Nothing this utterance said was an answer to an address question.
            let mut update = StateUpdate::to(Stage::WaitingForAddress)
                .say(format!("I'd be happy to get you a quote. {ADDRESS_PROMPT}"));
            update.address_prompted = Some(true);
            update.customer_name = name;
            return update;
        }

        let mut update = if state.address_prompted {
            attempts.address_extraction += 1;
            if attempts.address_extraction >= ctx.settings.max_address_attempts {
                StateUpdate::close(ClosingReason::AddressNotUnderstood).with_attempts(attempts)
            } else {
                StateUpdate::to(Stage::WaitingForAddress)
                    .say(reprompt(&partial.missing_fields(), gained))
                    .with_attempts(attempts)
            }
        } else {
            StateUpdate::to(Stage::WaitingForAddress).say(reprompt(&partial.missing_fields(), gained))
        };
        update.partial_address = Some(partial);
        update.address_prompted = Some(true);
        update.customer_name = name;
        update
    }
}

fn reprompt(missing: &[&'static str], gained: bool) -> String {
    let missing: Vec<String> = missing.iter().map(|field| field.to_string()).collect();
    if gained {
        format!("Thanks. Could you also tell me the {}?", spoken_list(&missing, "and"))
    } else {
        format!(
            "Sorry, I didn't quite catch that. Could you tell me the {} of the property?",
            spoken_list(&missing, "and")
        )
    }
}
