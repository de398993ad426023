//! # Core Types
//!
//! Backend-independent pieces of the runtime.
//!
//! - **[`capabilities`]:** Extension / validation-layer negotiation against what the driver reports.
//! - **[`config`]:** Manager configuration and device selection parameters.
//! - **[`device`]:** Adapter property snapshots and queue family descriptors.

pub mod capabilities;
pub mod config;
pub mod device;
