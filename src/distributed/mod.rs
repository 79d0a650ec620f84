//! Distributed mode
//!
//! Coordinator/participant plumbing for running an averaging round across
//! machines. The coordinator service owns one aggregation engine and speaks
//! a framed MessagePack protocol over TCP; participant clients submit their
//! local image and fetch the aggregate.

pub mod coordinator;
pub mod participant;
pub mod protocol;

pub use coordinator::Coordinator;
pub use participant::Participant;
