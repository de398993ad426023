use ash::vk;
use thiserror::Error;

use crate::core::capabilities::CapabilityKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "only {} out of {} requested {kind} are available; requested: [{}], available: [{}]",
        .satisfied.len(),
        .requested.len(),
        .requested.join(", "),
        .available.join(", ")
    )]
    CapabilityNegotiation {
        kind: CapabilityKind,
        requested: Vec<String>,
        available: Vec<String>,
        satisfied: Vec<String>,
    },

    #[error("failed to find GPUs with Vulkan support; are the Vulkan drivers installed?")]
    NoAdapter,

    #[error("physical device index {index} is out of range ({count} adapters found)")]
    InvalidAdapterIndex { index: usize, count: usize },

    #[error("queue index {index} is out of range ({count} queues created)")]
    InvalidQueueIndex { index: usize, count: usize },

    #[error("adapter {adapter:?} exposes no compute-capable queue family")]
    NoComputeQueue { adapter: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("Vulkan loader unavailable: {0}")]
    LoaderUnavailable(String),

    #[error("{op} failed: {result}")]
    Vulkan { op: &'static str, result: vk::Result },

    #[error("device memory allocation failed: {0}")]
    Allocation(String),

    #[error("shader compilation failed: {0}")]
    ShaderCompilation(String),
}

impl Error {
    pub(crate) fn vulkan(op: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Vulkan { op, result }
    }
}
