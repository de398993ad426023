use ash::vk;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable holding extra instance-level validation layers.
pub const ENV_INSTANCE_LAYERS: &str = "VKRT_ENV_DEBUG_LAYERS";
/// Environment variable holding extra device-level validation layers.
pub const ENV_DEVICE_LAYERS: &str = "VKRT_ENV_DEVICE_DEBUG_LAYERS";

/// Process-independent knobs for a [`Manager`](crate::Manager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub application_name: String,
    pub application_version: u32,
    /// Target Vulkan API version, packed with `vk::make_api_version`.
    pub api_version: u32,
    /// Enables debug extensions, validation layers and driver callbacks.
    pub diagnostics: bool,
    /// Track created resources and destroy the survivors on teardown.
    pub manage_resources: bool,
    pub instance_layers: Vec<String>,
    pub device_layers: Vec<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            application_name: "vkrt".to_string(),
            application_version: vk::make_api_version(0, 0, 1, 0),
            api_version: vk::API_VERSION_1_2,
            diagnostics: false,
            manage_resources: true,
            instance_layers: Vec::new(),
            device_layers: Vec::new(),
        }
    }
}

impl ManagerConfig {
    /// Defaults plus whatever the process environment asks for.
    pub fn from_env() -> Self {
        Self {
            diagnostics: cfg!(feature = "debug-layers"),
            instance_layers: layers_from_var(ENV_INSTANCE_LAYERS),
            device_layers: layers_from_var(ENV_DEVICE_LAYERS),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidState(format!("bad manager config: {e}")))
    }

    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    pub fn with_manage_resources(mut self, enabled: bool) -> Self {
        self.manage_resources = enabled;
        self
    }
}

/// Which adapter and queues a freshly bootstrapped device should use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSelection {
    pub physical_device_index: usize,
    /// Empty means "first compute-capable family". Repeats request extra queues.
    pub queue_family_indices: Vec<u32>,
    pub desired_extensions: Vec<String>,
}

impl DeviceSelection {
    pub fn new(physical_device_index: usize, queue_family_indices: Vec<u32>, desired_extensions: Vec<String>) -> Self {
        Self { physical_device_index, queue_family_indices, desired_extensions }
    }
}

pub fn parse_layer_list(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

fn layers_from_var(var: &str) -> Vec<String> {
    std::env::var(var).map(|v| parse_layer_list(&v)).unwrap_or_default()
}
