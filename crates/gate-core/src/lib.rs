//! Gate Core - access verification for the gate node.
//!
//! This crate implements:
//! - Credential and gate identity model
//! - Radio lifecycle manager (exclusive radio ownership, bounded retry)
//! - Verification client (one request per cycle, hard timeout)
//! - Access verification engine (state machine and re-entrancy guard)
//! - Indicator sink abstraction and panel layout

#![forbid(unsafe_code)]

// Core state machine
pub mod engine;

// Services
pub mod client;
pub mod radio;

// Model
pub mod credential;
pub mod identity;
pub mod request;
pub mod result;

// Outputs
pub mod indicator;

// Supporting modules
pub mod errors;
pub mod harness;

pub use credential::{Credential, CredentialSource};
pub use engine::{AccessEngine, Delivery, EngineConfig, EngineHandle, EngineState};
pub use identity::{BackendEndpoint, GateIdentity};
pub use result::{ErrorKind, VerificationResult};
