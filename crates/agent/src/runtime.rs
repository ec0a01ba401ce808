//! Turn Executor: one inbound utterance in, one spoken reply out.

use std::sync::Arc;

use callquote_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use callquote_core::config::ConversationConfig;
use callquote_core::domain::conversation::{CallId, ConversationState, Message, Role};
use callquote_core::domain::tenant::{TenantId, TenantProfile};
use callquote_core::errors::ApplicationError;
use callquote_core::flows::{FlowEngine, NodeKind, ReceptionistFlow, RouteDecision, Stage};
use callquote_db::repositories::{ConversationRepository, RepositoryError, TenantRepository};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::extraction::Extractor;
use crate::guardrails::{GuardrailDecision, GuardrailPolicy, FALLBACK_APOLOGY};
use crate::nodes::{node_for, NodeContext};
use crate::tools::BusinessTools;

const ACTOR: &str = "turn-executor";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always answers the same instant.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Forwards audit events to the log stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        debug!(
            event_name = %event.event_type,
            correlation_id = %event.correlation_id,
            call_id = %event.call_id,
            tenant_id = %event.tenant_id,
            category = ?event.category,
            outcome = ?event.outcome,
            metadata = ?event.metadata,
            "audit event"
        );
    }
}

#[derive(Clone, Debug)]
pub struct TurnRequest {
    pub tenant_id: TenantId,
    pub call_id: CallId,
    pub customer_phone: Option<String>,
    pub utterance: String,
    pub correlation_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TurnReply {
    pub message: String,
    /// `None` when the turn failed and nothing was persisted.
    pub stage: Option<Stage>,
    pub call_ended: bool,
}

impl TurnReply {
    fn apology() -> Self {
        Self { message: FALLBACK_APOLOGY.to_string(), stage: None, call_ended: false }
    }
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("turn finished without an assistant message")]
    EmptyResponse,
    #[error("turn exceeded {0} node hops")]
    HopLimitExceeded(u32),
    #[error("conversation `{0}` was updated by a concurrent turn")]
    Conflict(String),
    #[error(transparent)]
    Persistence(RepositoryError),
}

impl From<RepositoryError> for TurnError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Conflict { call_id, .. } => Self::Conflict(call_id),
            other => Self::Persistence(other),
        }
    }
}

impl From<TurnError> for ApplicationError {
    fn from(error: TurnError) -> Self {
        match error {
            TurnError::Conflict(call_id) => Self::Conflict(call_id),
            TurnError::Persistence(error) => Self::Persistence(error.to_string()),
            fault @ (TurnError::EmptyResponse | TurnError::HopLimitExceeded(_)) => {
                Self::Engine(fault.to_string())
            }
        }
    }
}

pub struct AgentRuntime {
    conversations: Arc<dyn ConversationRepository>,
    tenants: Arc<dyn TenantRepository>,
    extractor: Extractor,
    tools: BusinessTools,
    clock: Arc<dyn Clock>,
    settings: ConversationConfig,
    guardrails: GuardrailPolicy,
    engine: FlowEngine<ReceptionistFlow>,
    audit: Arc<dyn AuditSink>,
}

impl AgentRuntime {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        tenants: Arc<dyn TenantRepository>,
        extractor: Extractor,
        tools: BusinessTools,
        settings: ConversationConfig,
    ) -> Self {
        Self {
            conversations,
            tenants,
            extractor,
            tools,
            clock: Arc::new(SystemClock),
            settings,
            guardrails: GuardrailPolicy::default(),
            engine: FlowEngine::default(),
            audit: Arc::new(TracingAuditSink),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_guardrails(mut self, guardrails: GuardrailPolicy) -> Self {
        self.guardrails = guardrails;
        self
    }

    pub fn model_name(&self) -> &'static str {
        self.extractor.model_name()
    }

    /// Never fails: any engine fault becomes the generic apology.
    pub async fn handle_turn(&self, request: TurnRequest) -> TurnReply {
        match self.execute_turn(&request).await {
            Ok(reply) => reply,
            Err(turn_error) => {
                error!(
                    event_name = "conversation.turn.failed",
                    correlation_id = %request.correlation_id,
                    call_id = %request.call_id.0,
                    tenant_id = %request.tenant_id.0,
                    error = %turn_error,
                    "turn failed, answering with the fallback apology"
                );
                let audit = audit_context(&request);
                self.audit.emit(
                    AuditEvent::new(
                        &audit,
                        "conversation.turn.failed",
                        AuditCategory::System,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error", turn_error.to_string()),
                );
                TurnReply::apology()
            }
        }
    }

    pub async fn execute_turn(&self, request: &TurnRequest) -> Result<TurnReply, TurnError> {
        let audit = audit_context(request);
        self.audit.emit(AuditEvent::new(
            &audit,
            "conversation.turn.started",
            AuditCategory::Ingress,
            AuditOutcome::Success,
        ));

        let now = self.clock.now();
        let mut state = match self.conversations.find_by_call_id(&request.call_id).await? {
            Some(state) => state,
            None => ConversationState::new(
                request.call_id.clone(),
                request.tenant_id.clone(),
                request.customer_phone.clone(),
                now,
            ),
        };
        if state.customer_phone.is_none() {
            state.customer_phone =
                request.customer_phone.clone().filter(|phone| !phone.trim().is_empty());
        }
        let turn_start = state.messages.len();
        state.push_user(request.utterance.trim());

        let lookup = self.load_tenant(&state.tenant_id, request).await;
        let tenant_lookup_failed = lookup.is_err();
        let tenant = lookup.ok().flatten();
        let ctx = NodeContext {
            extractor: &self.extractor,
            tools: &self.tools,
            tenant: tenant.as_ref(),
            tenant_lookup_failed,
            clock: self.clock.as_ref(),
            settings: &self.settings,
            correlation_id: &request.correlation_id,
        };

        let max_hops = self.settings.max_hops_per_turn;
        let mut hops = 0_u32;
        if !state.stage.is_terminal() {
            self.run_node(NodeKind::Greeting, &mut state, &ctx, &audit).await;
            hops += 1;
        }
        loop {
            match self.engine.route_with_audit(state.stage, self.audit.as_ref(), &audit) {
                RouteDecision::Stop | RouteDecision::Terminal => break,
                RouteDecision::Run(kind) => {
                    if hops >= max_hops {
                        return Err(TurnError::HopLimitExceeded(max_hops));
                    }
                    self.run_node(kind, &mut state, &ctx, &audit).await;
                    hops += 1;
                }
            }
        }

        state.updated_at = now;
        let version = self.conversations.save(&state).await?;

        let message = turn_reply_text(&state.messages[turn_start..])
            .or_else(|| state.latest_assistant_message().map(str::to_string))
            .ok_or(TurnError::EmptyResponse)?;
        let message = self.review(message, request);

        info!(
            event_name = "conversation.turn.completed",
            correlation_id = %request.correlation_id,
            call_id = %state.call_id.0,
            tenant_id = %state.tenant_id.0,
            stage = state.stage.as_str(),
            hops,
            version,
            "turn completed"
        );
        self.audit.emit(
            AuditEvent::new(
                &audit,
                "conversation.turn.completed",
                AuditCategory::Persistence,
                AuditOutcome::Success,
            )
            .with_metadata("stage", state.stage.as_str())
            .with_metadata("hops", hops.to_string())
            .with_metadata("version", version.to_string()),
        );

        Ok(TurnReply { message, stage: Some(state.stage), call_ended: state.stage.is_terminal() })
    }

    /// Logs a missing tenant or a store error; either way the turn goes on.
    async fn load_tenant(
        &self,
        tenant_id: &TenantId,
        request: &TurnRequest,
    ) -> Result<Option<TenantProfile>, RepositoryError> {
        match self.tenants.find_by_id(tenant_id).await {
            Ok(Some(profile)) => Ok(Some(profile)),
            Ok(None) => {
                warn!(
                    event_name = "conversation.tenant.missing",
                    correlation_id = %request.correlation_id,
                    call_id = %request.call_id.0,
                    tenant_id = %tenant_id.0,
                    "tenant profile not found"
                );
                Ok(None)
            }
            Err(lookup_error) => {
                warn!(
                    event_name = "conversation.tenant.lookup_failed",
                    correlation_id = %request.correlation_id,
                    call_id = %request.call_id.0,
                    tenant_id = %tenant_id.0,
                    error = %lookup_error,
                    "tenant lookup failed"
                );
                Err(lookup_error)
            }
        }
    }

    async fn run_node(
        &self,
        kind: NodeKind,
        state: &mut ConversationState,
        ctx: &NodeContext<'_>,
        audit: &AuditContext,
    ) {
        let from = state.stage;
        let update = node_for(kind).run(state, ctx).await;
        state.apply(update);

        debug!(
            event_name = "conversation.node.executed",
            correlation_id = %ctx.correlation_id,
            call_id = %state.call_id.0,
            tenant_id = %state.tenant_id.0,
            node = kind.as_str(),
            from = from.as_str(),
            stage = state.stage.as_str(),
            "node executed"
        );
        self.audit.emit(
            AuditEvent::new(audit, "conversation.node.executed", AuditCategory::Node, AuditOutcome::Success)
                .with_metadata("node", kind.as_str())
                .with_metadata("from", from.as_str())
                .with_metadata("to", state.stage.as_str()),
        );
    }

    fn review(&self, message: String, request: &TurnRequest) -> String {
        let decision = self.guardrails.review(&message);
        if let Some(reason_code) = decision.reason_code() {
            let replaced = matches!(decision, GuardrailDecision::Deny { .. });
            warn!(
                event_name = "conversation.reply.guarded",
                correlation_id = %request.correlation_id,
                call_id = %request.call_id.0,
                tenant_id = %request.tenant_id.0,
                reason_code,
                replaced,
                "outgoing reply rewritten"
            );
        }
        decision.into_spoken(message)
    }
}

fn audit_context(request: &TurnRequest) -> AuditContext {
    AuditContext::new(
        request.call_id.0.as_str(),
        request.tenant_id.0.as_str(),
        request.correlation_id.as_str(),
        ACTOR,
    )
}

/// Everything the agent said during this turn, in order.
fn turn_reply_text(messages: &[Message]) -> Option<String> {
    let spoken: Vec<&str> = messages
        .iter()
        .filter(|message| message.role == Role::Assistant)
        .map(|message| message.content.trim())
        .filter(|content| !content.is_empty())
        .collect();
    (!spoken.is_empty()).then(|| spoken.join(" "))
}
