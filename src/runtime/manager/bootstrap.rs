//! Instance and device creation: the fatal-on-mismatch path every owned
//! [`Manager`](super::Manager) goes through exactly once.

use std::collections::HashMap;

use ash::vk;
use tracing::{debug, info};

use crate::backend::{DeviceDescriptor, Driver, InstanceDescriptor, QueueRequest};
use crate::core::capabilities::{dedup_preserving_order, negotiate, CapabilityKind};
use crate::core::config::{DeviceSelection, ManagerConfig};
use crate::core::device::QueueFamily;
use crate::error::{Error, Result};

pub const DEBUG_REPORT_EXTENSION: &str = "VK_EXT_debug_report";
pub const DEBUG_UTILS_EXTENSION: &str = "VK_EXT_debug_utils";
/// Lets shaders use debug printf through the validation layer.
pub const SHADER_NON_SEMANTIC_INFO_EXTENSION: &str = "VK_KHR_shader_non_semantic_info";

pub(crate) struct InstanceParts<D: Driver> {
    pub instance: D::Instance,
    pub debug_callbacks: Option<D::DebugCallbacks>,
}

pub(crate) struct DeviceParts<D: Driver> {
    pub physical_device: vk::PhysicalDevice,
    pub device: D::Device,
    pub queue_family_indices: Vec<u32>,
    pub queues: Vec<vk::Queue>,
}

pub(crate) fn create_instance<D: Driver>(driver: &D, config: &ManagerConfig) -> Result<InstanceParts<D>> {
    debug!("creating instance");

    let mut requested = Vec::new();
    if config.diagnostics {
        requested.push(DEBUG_REPORT_EXTENSION.to_string());
        requested.push(DEBUG_UTILS_EXTENSION.to_string());
    }
    let available = driver.instance_extensions()?;
    let extensions = negotiate(CapabilityKind::InstanceExtensions, &requested, &available)?;

    let layers = if config.diagnostics {
        debug!(layers = ?config.instance_layers, "requesting instance validation layers");
        let available = driver.instance_layers()?;
        negotiate(CapabilityKind::InstanceLayers, &config.instance_layers, &available)?
    } else {
        Vec::new()
    };

    let desc = InstanceDescriptor {
        application_name: config.application_name.clone(),
        application_version: config.application_version,
        api_version: config.api_version,
        debug_printf: config.diagnostics && !layers.is_empty(),
        extensions,
        layers,
    };
    let instance = driver.create_instance(&desc)?;
    debug!("instance created");

    let debug_callbacks = if config.diagnostics {
        match driver.register_debug_callbacks(&instance) {
            Ok(callbacks) => Some(callbacks),
            Err(e) => {
                driver.destroy_instance(&instance);
                return Err(e);
            }
        }
    } else {
        None
    };

    Ok(InstanceParts { instance, debug_callbacks })
}

pub(crate) fn create_device<D: Driver>(
    driver: &D,
    instance: Option<&D::Instance>,
    config: &ManagerConfig,
    selection: &DeviceSelection,
) -> Result<DeviceParts<D>> {
    debug!("creating device");
    let instance = instance.ok_or_else(|| Error::InvalidState("cannot create a device without an instance".into()))?;

    let adapters = driver.enumerate_physical_devices(instance)?;
    if adapters.is_empty() {
        return Err(Error::NoAdapter);
    }
    let index = selection.physical_device_index;
    let physical_device = *adapters
        .get(index)
        .ok_or(Error::InvalidAdapterIndex { index, count: adapters.len() })?;

    let props = driver.physical_device_properties(instance, physical_device);
    info!(index, name = %props.name, "using physical device");

    let queue_family_indices = if selection.queue_family_indices.is_empty() {
        let families = driver.queue_families(instance, physical_device);
        let family = first_compute_family(&families).ok_or(Error::NoComputeQueue { adapter: props.name.clone() })?;
        vec![family]
    } else {
        selection.queue_family_indices.clone()
    };

    let mut requested = selection.desired_extensions.clone();
    if config.diagnostics {
        requested.push(SHADER_NON_SEMANTIC_INFO_EXTENSION.to_string());
    }
    let requested = dedup_preserving_order(requested);
    let available = driver.device_extensions(instance, physical_device)?;
    let extensions = negotiate(CapabilityKind::DeviceExtensions, &requested, &available)?;

    // Device layers are matched against the instance layer list.
    let layers = if config.diagnostics {
        debug!(layers = ?config.device_layers, "requesting device validation layers");
        let available = driver.instance_layers()?;
        negotiate(CapabilityKind::DeviceLayers, &config.device_layers, &available)?
    } else {
        Vec::new()
    };

    let desc = DeviceDescriptor { queues: group_queue_requests(&queue_family_indices), extensions, layers };
    let device = driver.create_device(instance, physical_device, &desc)?;
    debug!("device created");

    let queues = fetch_queues(driver, &device, &queue_family_indices);
    debug!(count = queues.len(), "compute queues obtained");

    Ok(DeviceParts { physical_device, device, queue_family_indices, queues })
}

pub fn first_compute_family(families: &[QueueFamily]) -> Option<u32> {
    families.iter().position(QueueFamily::supports_compute).map(|i| i as u32)
}

/// Collapses repeated family indices into one request per family, ordered by
/// first appearance.
pub fn group_queue_requests(family_indices: &[u32]) -> Vec<QueueRequest> {
    let mut requests: Vec<QueueRequest> = Vec::new();
    for &family in family_indices {
        match requests.iter_mut().find(|r| r.family == family) {
            Some(request) => request.count += 1,
            None => requests.push(QueueRequest { family, count: 1 }),
        }
    }
    requests
}

/// One queue per entry; repeated families get successive queue indices.
pub(crate) fn fetch_queues<D: Driver>(driver: &D, device: &D::Device, family_indices: &[u32]) -> Vec<vk::Queue> {
    let mut next_index: HashMap<u32, u32> = HashMap::new();
    family_indices
        .iter()
        .map(|&family| {
            let slot = next_index.entry(family).or_insert(0);
            let queue = driver.get_queue(device, family, *slot);
            *slot += 1;
            queue
        })
        .collect()
}
