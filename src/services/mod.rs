//! Collaborators of a provisioning attempt
//!
//! Each service owns one external concern. The orchestrator sequences them.

pub mod confirmation;
pub mod device;
pub mod network;
pub mod push;
pub mod session;
