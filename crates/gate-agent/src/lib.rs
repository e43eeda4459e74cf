//! Gate agent - host daemon for an access-control gate node.
//!
//! This crate wires credential sources, the access engine and indicator
//! outputs into a running service.

pub mod config;
pub mod indicator;
pub mod radio;
pub mod service;
pub mod source;
