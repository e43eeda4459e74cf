//! Transport seams for the gate node.
//!
//! The network radio and the authorization backend are both reached through
//! narrow traits so the verification engine can run against real hardware,
//! a host network stack, or the scripted fakes in [`testing`].

pub mod backend;
pub mod backoff;
pub mod radio;
pub mod testing;

#[cfg(feature = "http")]
pub mod http;

pub use backend::*;
pub use backoff::*;
pub use radio::*;
pub use testing::*;

#[cfg(feature = "http")]
pub use http::*;
