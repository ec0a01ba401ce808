//! Receptionist runtime: the stage nodes, the turn executor and the clients
//! for the two external capabilities they lean on.
//!
//! # Architecture
//!
//! Every inbound utterance is one turn:
//! 1. **Load** the call's record (or create it) and append the utterance.
//! 2. **Route and run** (`runtime`): the stage router picks a node, the node
//!    returns a partial update, repeat until the router says stop or terminal.
//! 3. **Persist** once, then answer with the latest assistant message.
//!
//! Nodes (`nodes`) never fail outward. Extraction (`extraction`, backed by a
//! [`llm::LanguageModel`]) and tool calls (`tools`) are timeout-bounded, and
//! every failure maps to a spoken fallback.
//!
//! # Safety Principle
//!
//! The language model only reads text. Prices, service areas and bookings
//! come from tools, never from a completion.

pub mod conversation;
pub mod extraction;
pub mod guardrails;
pub mod llm;
pub mod nodes;
pub mod runtime;
pub mod tools;
