use async_trait::async_trait;
use callquote_core::domain::conversation::{ConversationState, StateUpdate};
use callquote_core::flows::{NodeKind, Stage};
use tracing::info;

use super::{log_fallback, NodeContext, StageNode};

/// One lookup per call. A miss is not fatal: quoting falls back to a range.
pub struct PropertyLookupNode;

#[async_trait]
impl StageNode for PropertyLookupNode {
    fn kind(&self) -> NodeKind {
        NodeKind::PropertyLookup
    }

    async fn run(&self, state: &ConversationState, ctx: &NodeContext<'_>) -> StateUpdate {
        if state.property_data.is_some() {
            return StateUpdate::to(Stage::Quoting);
        }
        let Some(address) = &state.customer_address else {
            return StateUpdate::to(Stage::Quoting);
        };

        let mut attempts = state.attempts;
        match ctx.tools.lookup_property(address).await {
            Ok(Some(property)) => {
                attempts.property_lookup = 0;
                StateUpdate {
                    property_data: Some(property),
                    ..StateUpdate::to(Stage::Quoting).with_attempts(attempts)
                }
            }
            Ok(None) => {
                attempts.property_lookup += 1;
                info!(
                    event_name = "conversation.property.not_found",
                    correlation_id = ctx.correlation_id,
                    call_id = %state.call_id.0,
                    tenant_id = %state.tenant_id.0,
                    "no property record, quoting from the generic range"
                );
                StateUpdate::to(Stage::Quoting).with_attempts(attempts)
            }
            Err(error) => {
                attempts.property_lookup += 1;
                log_fallback(state, ctx, self.kind(), &error);
                StateUpdate::to(Stage::Quoting).with_attempts(attempts)
            }
        }
    }
}
