use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{NodeKind, RouteDecision, Stage};

pub trait FlowDefinition {
    fn name(&self) -> &'static str;
    fn initial_stage(&self) -> Stage;
    fn route(&self, stage: Stage) -> RouteDecision;
}

/// The phone receptionist: greet, qualify, quote, book, close.
#[derive(Clone, Debug, Default)]
pub struct ReceptionistFlow;

impl FlowDefinition for ReceptionistFlow {
    fn name(&self) -> &'static str {
        "receptionist"
    }

    fn initial_stage(&self) -> Stage {
        Stage::Greeting
    }

    fn route(&self, stage: Stage) -> RouteDecision {
        route_receptionist(stage)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn flow_name(&self) -> &'static str {
        self.flow.name()
    }

    pub fn initial_stage(&self) -> Stage {
        self.flow.initial_stage()
    }

    pub fn route(&self, stage: Stage) -> RouteDecision {
        self.flow.route(stage)
    }

    pub fn route_with_audit<S>(&self, stage: Stage, sink: &S, audit: &AuditContext) -> RouteDecision
    where
        S: AuditSink + ?Sized,
    {
        let decision = self.route(stage);
        let (decision_label, node) = match decision {
            RouteDecision::Run(node) => ("run", node.as_str()),
            RouteDecision::Stop => ("stop", ""),
            RouteDecision::Terminal => ("terminal", ""),
        };
        let outcome = match decision {
            RouteDecision::Terminal if stage == Stage::Unknown => AuditOutcome::Rejected,
            _ => AuditOutcome::Success,
        };
        sink.emit(
            AuditEvent::new(audit, "flow.route_decided", AuditCategory::Flow, outcome)
                .with_metadata("flow", self.flow.name())
                .with_metadata("stage", stage.as_str())
                .with_metadata("decision", decision_label)
                .with_metadata("node", node),
        );
        decision
    }
}

impl Default for FlowEngine<ReceptionistFlow> {
    fn default() -> Self {
        Self::new(ReceptionistFlow)
    }
}

fn route_receptionist(stage: Stage) -> RouteDecision {
    use RouteDecision::{Run, Stop, Terminal};

    match stage {
        Stage::Greeting => Run(NodeKind::Greeting),
        Stage::IntentRouting => Run(NodeKind::IntentRouter),
        Stage::AddressCollection => Run(NodeKind::AddressExtraction),
        Stage::FrequencyCollection => Run(NodeKind::FrequencyCollection),
        Stage::PropertyLookup => Run(NodeKind::PropertyLookup),
        Stage::Quoting => Run(NodeKind::QuoteCalculation),
        Stage::Booking => Run(NodeKind::Booking),
        Stage::Closing => Run(NodeKind::Closing),
        Stage::WaitingForAddress
        | Stage::WaitingForIntent
        | Stage::WaitingForFrequency
        | Stage::WaitingForCallbackNumber
        | Stage::WaitingForBookingDecision
        | Stage::WaitingForTimeSlot => Stop,
        Stage::End | Stage::Unknown => Terminal,
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, AuditOutcome, InMemoryAuditSink};
    use crate::flows::engine::{FlowDefinition, FlowEngine, ReceptionistFlow};
    use crate::flows::states::{NodeKind, RouteDecision, Stage};

    #[test]
    fn every_stage_has_exactly_one_routing_rule() {
        let engine = FlowEngine::new(ReceptionistFlow);
        for stage in Stage::ALL {
            let decision = engine.route(stage);
            match decision {
                RouteDecision::Stop => assert!(stage.is_waiting(), "{stage:?}"),
                RouteDecision::Terminal => assert!(stage.is_terminal(), "{stage:?}"),
                RouteDecision::Run(_) => {
                    assert!(!stage.is_waiting() && !stage.is_terminal(), "{stage:?}")
                }
            }
        }
    }

    #[test]
    fn active_stages_route_to_their_owning_node() {
        let engine = FlowEngine::default();
        let expected = [
            (Stage::Greeting, NodeKind::Greeting),
            (Stage::IntentRouting, NodeKind::IntentRouter),
            (Stage::AddressCollection, NodeKind::AddressExtraction),
            (Stage::FrequencyCollection, NodeKind::FrequencyCollection),
            (Stage::PropertyLookup, NodeKind::PropertyLookup),
            (Stage::Quoting, NodeKind::QuoteCalculation),
            (Stage::Booking, NodeKind::Booking),
            (Stage::Closing, NodeKind::Closing),
        ];
        for (stage, node) in expected {
            assert_eq!(engine.route(stage), RouteDecision::Run(node));
        }
    }

    #[test]
    fn end_and_unknown_are_terminal() {
        let flow = ReceptionistFlow;
        assert_eq!(flow.initial_stage(), Stage::Greeting);
        assert_eq!(flow.route(Stage::End), RouteDecision::Terminal);
        assert_eq!(flow.route(Stage::parse("SOMETHING_ELSE")), RouteDecision::Terminal);
    }

    #[test]
    fn route_with_audit_records_the_decision() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new("CA-1", "green-acres", "req-7", "turn-executor");

        let decision = engine.route_with_audit(Stage::WaitingForFrequency, &sink, &audit);
        engine.route_with_audit(Stage::Unknown, &sink, &audit);

        assert_eq!(decision, RouteDecision::Stop);
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "flow.route_decided");
        assert_eq!(events[0].metadata.get("stage").map(String::as_str), Some("WAITING_FOR_FREQUENCY"));
        assert_eq!(events[0].metadata.get("decision").map(String::as_str), Some("stop"));
        assert_eq!(events[1].outcome, AuditOutcome::Rejected);
    }
}
