use async_trait::async_trait;
use callquote_core::domain::conversation::{ConversationState, StateUpdate};
use callquote_core::flows::{NodeKind, Stage};

use super::{log_fallback, NodeContext, StageNode};
use crate::extraction::CallerIntent;

pub const ADDRESS_PROMPT: &str =
    "What's the address of the property, including the city and zip code?";

pub struct IntentRouterNode;

#[async_trait]
impl StageNode for IntentRouterNode {
    fn kind(&self) -> NodeKind {
        NodeKind::IntentRouter
    }

    async fn run(&self, state: &ConversationState, ctx: &NodeContext<'_>) -> StateUpdate {
        let context = ctx.system_context(state);
        let utterance = state.latest_user_utterance();

        let intent = match ctx.extractor.classify_intent(&context, utterance).await {
            Ok(intent) => intent,
            Err(error) => {
                log_fallback(state, ctx, self.kind(), &error);
                return StateUpdate::to(Stage::AddressCollection);
            }
        };

        match intent {
            CallerIntent::BookingIntent => StateUpdate::to(Stage::AddressCollection),
            CallerIntent::Introduction => {
                let name = if state.customer_name.is_some() {
                    None
                } else {
                    match ctx.extractor.extract_name(&context, utterance).await {
                        Ok(name) => name,
                        Err(error) => {
                            log_fallback(state, ctx, self.kind(), &error);
                            None
                        }
                    }
                };
                let acknowledgement = match &name {
                    Some(name) => format!("Nice to meet you, {name}."),
                    None => "Hi there.".to_string(),
                };

                let mut update = StateUpdate::to(Stage::WaitingForAddress).say(format!(
                    "{acknowledgement} I can get you a quote in just a minute. {ADDRESS_PROMPT}"
                ));
                update.customer_name = name;
                update.address_prompted = Some(true);
                update
            }
            CallerIntent::GeneralQuestion => {
                match ctx.extractor.answer_question(&context, utterance).await {
                    Ok(answer) => StateUpdate::to(Stage::WaitingForIntent)
                        .say(format!("{answer} Would you like a free quote for your property?")),
                    Err(error) => {
                        log_fallback(state, ctx, self.kind(), &error);
                        StateUpdate::to(Stage::AddressCollection)
                    }
                }
            }
            CallerIntent::Unclear => StateUpdate::to(Stage::WaitingForIntent).say(
                "I can give you a quote for lawn service or answer questions about what we do. \
                 What can I help you with today?",
            ),
        }
    }
}
