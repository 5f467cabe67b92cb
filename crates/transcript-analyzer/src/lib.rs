//! Gemini-backed transcript analysis
//!
//! Concrete collaborators for the `orchestration` crate: a Gemini
//! [`RemoteAnalyzer`](orchestration::analysis::RemoteAnalyzer), an HTTP
//! learning store, and the wiring that assembles them from the environment.

pub mod config;
pub mod gemini;
pub mod learning_client;
pub mod wiring;
