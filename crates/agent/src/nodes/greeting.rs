use async_trait::async_trait;
use callquote_core::domain::conversation::{ConversationState, StateUpdate};
use callquote_core::flows::{NodeKind, Stage};

use super::{log_fallback, NodeContext, StageNode};

/// Opens the call on the first turn; on later turns turns the saved pause
/// back into the stage that was waiting on this utterance.
pub struct GreetingNode;

/// Active stage a pause resumes into.
pub fn resume_stage(stage: Stage) -> Option<Stage> {
    match stage {
        Stage::WaitingForAddress => Some(Stage::AddressCollection),
        Stage::WaitingForIntent => Some(Stage::IntentRouting),
        Stage::WaitingForFrequency => Some(Stage::FrequencyCollection),
        Stage::WaitingForCallbackNumber => Some(Stage::Quoting),
        Stage::WaitingForBookingDecision | Stage::WaitingForTimeSlot => Some(Stage::Booking),
        _ => None,
    }
}

#[async_trait]
impl StageNode for GreetingNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Greeting
    }

    async fn run(&self, state: &ConversationState, ctx: &NodeContext<'_>) -> StateUpdate {
        if state.has_greeted {
            return match (state.stage, resume_stage(state.stage)) {
                (_, Some(stage)) => StateUpdate::to(stage),
                (Stage::Greeting, None) => StateUpdate::to(Stage::IntentRouting),
                _ => StateUpdate::default(),
            };
        }
        if state.stage != Stage::Greeting {
            let mut update = resume_stage(state.stage).map(StateUpdate::to).unwrap_or_default();
            update.has_greeted = Some(true);
            return update;
        }

        let name = match ctx
            .extractor
            .extract_name(&ctx.system_context(state), state.latest_user_utterance())
            .await
        {
            Ok(name) => name,
            Err(error) => {
                log_fallback(state, ctx, self.kind(), &error);
                None
            }
        };

        let thanks = match ctx.business_name() {
            Some(business) => format!("thanks for calling {business}!"),
            None => "thanks for calling!".to_string(),
        };
        let opening = match &name {
            Some(name) => format!("Hi {name}, {thanks}"),
            None => format!("Hi, {thanks}"),
        };

        let mut update = StateUpdate::to(Stage::IntentRouting).say(opening);
        update.has_greeted = Some(true);
        update.customer_name = name;
        update
    }
}

#[cfg(test)]
mod tests {
    use callquote_core::flows::Stage;

    use super::{resume_stage, GreetingNode};
    use crate::nodes::testing::Harness;
    use crate::nodes::StageNode;

    #[tokio::test]
    async fn first_turn_greets_by_name_and_moves_to_intent_routing() {
        let harness = Harness::new();
        let state = harness.state(Stage::Greeting, "Hi, my name is Dana");

        let update = GreetingNode.run(&state, &harness.context()).await;

        assert_eq!(update.stage, Some(Stage::IntentRouting));
        assert_eq!(update.has_greeted, Some(true));
        assert_eq!(update.customer_name.as_deref(), Some("Dana"));
        assert_eq!(update.messages[0].content, "Hi Dana, thanks for calling Green Acres Lawn Care!");
    }

    #[tokio::test]
    async fn later_turns_only_resume_the_paused_stage() {
        let harness = Harness::new();
        let state = harness.state(Stage::WaitingForFrequency, "my name is Dana, weekly please");

        let update = GreetingNode.run(&state, &harness.context()).await;

        assert_eq!(update.stage, Some(Stage::FrequencyCollection));
        assert!(update.messages.is_empty());
        assert_eq!(update.customer_name, None);
    }

    #[tokio::test]
    async fn greeting_without_tenant_still_speaks() {
        let mut harness = Harness::new();
        harness.tenant = None;
        let state = harness.state(Stage::Greeting, "hello");

        let update = GreetingNode.run(&state, &harness.context()).await;
        assert_eq!(update.messages[0].content, "Hi, thanks for calling!");
    }

    #[test]
    fn every_pause_has_a_resume_target() {
        for stage in Stage::ALL.into_iter().filter(|stage| stage.is_waiting()) {
            assert!(resume_stage(stage).is_some(), "{}", stage.as_str());
        }
        assert_eq!(resume_stage(Stage::End), None);
    }
}
