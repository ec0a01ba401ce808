use async_trait::async_trait;
use callquote_core::domain::conversation::{
    ClosingReason, ConversationState, ServiceFrequency, StateUpdate,
};
use callquote_core::errors::DomainError;
use callquote_core::flows::{NodeKind, Stage};

use super::{log_fallback, spoken_list, NodeContext, StageNode};

pub struct FrequencyCollectionNode;

fn chosen(frequency: ServiceFrequency) -> StateUpdate {
    StateUpdate { preferred_frequency: Some(frequency), ..StateUpdate::to(Stage::PropertyLookup) }
}

#[async_trait]
impl StageNode for FrequencyCollectionNode {
    fn kind(&self) -> NodeKind {
        NodeKind::FrequencyCollection
    }

    async fn run(&self, state: &ConversationState, ctx: &NodeContext<'_>) -> StateUpdate {
        if state.preferred_frequency.is_some() {
            return StateUpdate::to(Stage::PropertyLookup);
        }

        let supported = ctx.tenant.map(|tenant| tenant.supported_frequencies()).unwrap_or_default();
        match supported.as_slice() {
            [] if ctx.tenant_lookup_failed => {
                log_fallback(state, ctx, self.kind(), &"tenant profile unavailable");
                return StateUpdate::close(ClosingReason::QuoteUnavailable);
            }
            [] => {
                let error = DomainError::TenantMisconfigured { tenant_id: state.tenant_id.0.clone() };
                log_fallback(state, ctx, self.kind(), &error);
                return StateUpdate::close(ClosingReason::ConfigurationError);
            }
            [only] => return chosen(*only),
            _ => {}
        }

        match ctx
            .extractor
            .extract_frequency(&ctx.system_context(state), state.latest_user_utterance(), &supported)
            .await
        {
            Ok(Some(frequency)) => return chosen(frequency),
            Ok(None) => {}
            Err(error) => log_fallback(state, ctx, self.kind(), &error),
        }

        let options: Vec<String> =
            supported.iter().map(|frequency| frequency.spoken().to_string()).collect();
        StateUpdate::to(Stage::WaitingForFrequency).say(format!(
            "How often would you like us to come out: {}?",
            spoken_list(&options, "or")
        ))
    }
}
