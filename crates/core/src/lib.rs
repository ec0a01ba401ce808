//! Domain core for the phone receptionist: conversation state, tenant facts,
//! the stage router, error taxonomy, audit events and layered configuration.

pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;

pub use domain::conversation::{
    CallId, ClosingReason, ConversationState, Message, Role, ServiceFrequency, StateUpdate,
};
pub use domain::tenant::{TenantId, TenantProfile};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{FlowEngine, NodeKind, ReceptionistFlow, RouteDecision, Stage};
