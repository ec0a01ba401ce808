pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, ReceptionistFlow};
pub use states::{NodeKind, RouteDecision, Stage};
