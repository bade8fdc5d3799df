//! Test doubles for pcci.
//!
//! - [`InMemoryStore`] - coordination store with the Redis backend's semantics
//! - [`ScriptedInvoker`] - process invoker answering from a script
//! - [`fixtures`] - job, outcome and configuration builders

pub mod fixtures;
mod invoker;
mod store;

pub use invoker::{Scripted, ScriptedInvoker};
pub use store::InMemoryStore;
