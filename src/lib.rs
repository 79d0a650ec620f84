//! fedpix - Federated pixel-wise image averaging
//!
//! fedpix implements the coordinator side of a distributed averaging workflow:
//! each participant holds one grayscale BMP image, all of identical
//! dimensions; the coordinator collects one image per participant, computes
//! the pixel-wise mean across all received images, and returns the result to
//! participants.
//!
//! # Architecture
//!
//! - **Raster codec**: decode/encode 8-bit uncompressed grayscale BMP
//! - **Aggregation engine**: per-round contribution map and mean reduction
//! - **Distributed mode**: framed MessagePack protocol over TCP between the
//!   coordinator service and participant clients

pub mod aggregate;
pub mod config;
pub mod distributed;
pub mod raster;

// Re-export commonly used types
pub use aggregate::{AggregateResult, AggregationEngine};
pub use raster::{DecodedRaster, SampleGrid};

/// Result type used throughout fedpix
pub type Result<T> = anyhow::Result<T>;
