#![allow(unsafe_op_in_unsafe_fn)]

//! # vkrt: managed Vulkan compute runtime
//!
//! A [`Manager`] brings up (or borrows) a Vulkan instance and logical device,
//! negotiates extensions and validation layers against what the driver
//! offers, and hands out [`Tensor`]s, [`Algorithm`]s and [`Sequence`]s. Every
//! resource it creates is tracked weakly and destroyed before the device it
//! lives on.
//!
//! ## Modules
//!
//! - **[`core`]**: configuration, capability negotiation, device descriptions.
//! - **[`backend`]**: the [`Driver`] seam and its `ash` implementation.
//! - **[`runtime`]**: the manager and its resources.
//! - **[`doctor`]**: logging setup and the validation-message sink.
//!
//! ## Features
//!
//! - `debug-layers`: turn diagnostics on in [`ManagerConfig::from_env`].
//! - `shaderc`: GLSL compilation through [`shader::compile_source`].

pub mod backend;
pub mod core;
pub mod doctor;
pub mod error;
pub mod runtime;
#[cfg(feature = "shaderc")]
pub mod shader;

pub use ash;

pub use crate::backend::{Driver, VulkanDriver};
pub use crate::core::config::{DeviceSelection, ManagerConfig};
pub use crate::core::device::{DeviceKind, DeviceProperties};
pub use crate::error::{Error, Result};
pub use crate::runtime::{Algorithm, Manager, Sequence, Tensor, TensorDataType, TrackedCounts};
