use std::fmt;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info, warn};

use crate::backend::{Driver, VulkanDriver};
use crate::core::config::{DeviceSelection, ManagerConfig};
use crate::core::device::DeviceProperties;
use crate::error::{Error, Result};
use crate::runtime::algorithm::Algorithm;
use crate::runtime::sequence::Sequence;
use crate::runtime::tensor::{Tensor, TensorDataType, TensorElement};

pub mod bootstrap;
pub mod ownership;
pub mod registry;

pub use ownership::Ownership;
pub use registry::{Registry, Tracked};

/// Counts of tracked (not necessarily alive) resources per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackedCounts {
    pub sequences: usize,
    pub algorithms: usize,
    pub tensors: usize,
}

/// Owns (or borrows) a Vulkan instance and device and hands out the
/// resources that run on them.
///
/// Teardown order is fixed: sequences, algorithms, tensors, device, debug
/// callbacks, instance. Borrowed handles are never destroyed.
pub struct Manager<D: Driver = VulkanDriver> {
    driver: Arc<D>,
    config: ManagerConfig,
    instance: Option<Ownership<D::Instance>>,
    debug_callbacks: Option<D::DebugCallbacks>,
    physical_device: vk::PhysicalDevice,
    device: Option<Ownership<D::Device>>,
    queue_family_indices: Vec<u32>,
    queues: Vec<vk::Queue>,
    sequences: Registry<Sequence<D>>,
    algorithms: Registry<Algorithm<D>>,
    tensors: Registry<Tensor<D>>,
}

impl<D: Driver> fmt::Debug for Manager<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("physical_device", &self.physical_device)
            .field("owns_instance", &self.instance.as_ref().map(Ownership::is_owned))
            .field("owns_device", &self.device.as_ref().map(Ownership::is_owned))
            .field("queue_family_indices", &self.queue_family_indices)
            .field("sequences", &self.sequences)
            .field("algorithms", &self.algorithms)
            .field("tensors", &self.tensors)
            .finish_non_exhaustive()
    }
}

impl Manager<VulkanDriver> {
    /// Bootstraps on adapter 0 with the first compute-capable queue family.
    pub fn new() -> Result<Self> {
        Self::with_selection(DeviceSelection::default())
    }

    pub fn with_selection(selection: DeviceSelection) -> Result<Self> {
        let driver = Arc::new(VulkanDriver::load()?);
        Self::with_driver(driver, ManagerConfig::from_env(), &selection)
    }

    /// Wraps an instance and device owned by someone else. Neither is destroyed
    /// by the manager; resources it creates still are, unless `config` turns
    /// resource management off.
    pub fn from_vulkan_handles(
        config: ManagerConfig,
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queue_family_indices: Vec<u32>,
    ) -> Result<Self> {
        let driver = VulkanDriver::load()?;
        let device = driver.wrap_device(&instance, physical_device, device)?;
        Ok(Self::from_handles(
            Arc::new(driver),
            config,
            instance,
            physical_device,
            device,
            queue_family_indices,
        ))
    }
}

impl<D: Driver> Manager<D> {
    /// Creates a fresh instance and device through `driver`.
    ///
    /// Any failure is returned after everything created so far has been
    /// destroyed again.
    pub fn with_driver(driver: Arc<D>, config: ManagerConfig, selection: &DeviceSelection) -> Result<Self> {
        let parts = bootstrap::create_instance(driver.as_ref(), &config)?;

        let device_parts =
            match bootstrap::create_device(driver.as_ref(), Some(&parts.instance), &config, selection) {
                Ok(device_parts) => device_parts,
                Err(e) => {
                    if let Some(callbacks) = parts.debug_callbacks {
                        driver.unregister_debug_callbacks(&parts.instance, callbacks);
                    }
                    driver.destroy_instance(&parts.instance);
                    return Err(e);
                }
            };

        Ok(Self {
            driver,
            config,
            instance: Some(Ownership::Owned(parts.instance)),
            debug_callbacks: parts.debug_callbacks,
            physical_device: device_parts.physical_device,
            device: Some(Ownership::Owned(device_parts.device)),
            queue_family_indices: device_parts.queue_family_indices,
            queues: device_parts.queues,
            sequences: Registry::new(),
            algorithms: Registry::new(),
            tensors: Registry::new(),
        })
    }

    /// Borrows existing handles. `queue_family_indices` follows the same rules
    /// as [`DeviceSelection::queue_family_indices`], except that it is used
    /// verbatim (no discovery) and may be empty.
    pub fn from_handles(
        driver: Arc<D>,
        config: ManagerConfig,
        instance: D::Instance,
        physical_device: vk::PhysicalDevice,
        device: D::Device,
        queue_family_indices: Vec<u32>,
    ) -> Self {
        let queues = bootstrap::fetch_queues(driver.as_ref(), &device, &queue_family_indices);
        debug!(queues = queues.len(), "manager borrowing external instance and device");

        Self {
            driver,
            config,
            instance: Some(Ownership::Borrowed(instance)),
            debug_callbacks: None,
            physical_device,
            device: Some(Ownership::Borrowed(device)),
            queue_family_indices,
            queues,
            sequences: Registry::new(),
            algorithms: Registry::new(),
            tensors: Registry::new(),
        }
    }

    fn live_device(&self) -> Result<&D::Device> {
        self.device
            .as_ref()
            .map(Ownership::handle)
            .ok_or_else(|| Error::InvalidState("manager was already destroyed".into()))
    }

    fn live_instance(&self) -> Result<&D::Instance> {
        self.instance
            .as_ref()
            .map(Ownership::handle)
            .ok_or_else(|| Error::InvalidState("manager has no instance".into()))
    }

    /// New command batch on the queue at `queue_index`.
    pub fn sequence(&mut self, queue_index: usize, total_timestamps: u32) -> Result<Arc<Sequence<D>>> {
        debug!(queue_index, "creating sequence");
        let device = self.live_device()?.clone();
        let queue = *self
            .queues
            .get(queue_index)
            .ok_or(Error::InvalidQueueIndex { index: queue_index, count: self.queues.len() })?;
        let family = self.queue_family_indices[queue_index];

        let sequence = Arc::new(Sequence::new(
            Arc::clone(&self.driver),
            device,
            self.physical_device,
            queue,
            family,
            total_timestamps,
        )?);
        if self.config.manage_resources {
            self.sequences.register(&sequence);
        }
        Ok(sequence)
    }

    pub fn tensor<T: TensorElement>(&mut self, data: &[T]) -> Result<Arc<Tensor<D>>> {
        self.tensor_raw(bytemuck::cast_slice(data), data.len(), std::mem::size_of::<T>(), T::DATA_TYPE)
    }

    pub fn tensor_raw(
        &mut self,
        bytes: &[u8],
        element_count: usize,
        element_size: usize,
        data_type: TensorDataType,
    ) -> Result<Arc<Tensor<D>>> {
        let device = self.live_device()?.clone();
        let tensor = Arc::new(Tensor::new(
            Arc::clone(&self.driver),
            device,
            bytes,
            element_count,
            element_size,
            data_type,
        )?);
        if self.config.manage_resources {
            self.tensors.register(&tensor);
        }
        Ok(tensor)
    }

    /// Algorithm dispatched over `[tensors[0].size(), 1, 1]` workgroups.
    pub fn algorithm(&mut self, tensors: &[Arc<Tensor<D>>], spirv: &[u32]) -> Result<Arc<Algorithm<D>>> {
        let workgroup = default_workgroup(tensors.first().map_or(1, |t| t.size()))?;
        self.algorithm_with(tensors, spirv, workgroup, &[])
    }

    pub fn algorithm_with(
        &mut self,
        tensors: &[Arc<Tensor<D>>],
        spirv: &[u32],
        workgroup: [u32; 3],
        push_constants: &[u8],
    ) -> Result<Arc<Algorithm<D>>> {
        let device = self.live_device()?.clone();
        let algorithm = Arc::new(Algorithm::new(
            Arc::clone(&self.driver),
            device,
            tensors.to_vec(),
            spirv,
            workgroup,
            push_constants,
        )?);
        if self.config.manage_resources {
            self.algorithms.register(&algorithm);
        }
        Ok(algorithm)
    }

    /// Forgets tracked resources that were released or destroyed by their owners.
    pub fn clear(&mut self) {
        if !self.config.manage_resources {
            return;
        }
        let pruned = self.sequences.prune() + self.algorithms.prune() + self.tensors.prune();
        debug!(pruned, "pruned expired resources");
    }

    pub fn tracked_counts(&self) -> TrackedCounts {
        TrackedCounts {
            sequences: self.sequences.len(),
            algorithms: self.algorithms.len(),
            tensors: self.tensors.len(),
        }
    }

    pub fn device_properties(&self) -> Result<DeviceProperties> {
        Ok(self.driver.physical_device_properties(self.live_instance()?, self.physical_device))
    }

    pub fn list_devices(&self) -> Result<Vec<vk::PhysicalDevice>> {
        self.driver.enumerate_physical_devices(self.live_instance()?)
    }

    pub fn instance(&self) -> Option<&D::Instance> {
        self.instance.as_ref().map(Ownership::handle)
    }

    pub fn device(&self) -> Option<&D::Device> {
        self.device.as_ref().map(Ownership::handle)
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn queue_family_indices(&self) -> &[u32] {
        &self.queue_family_indices
    }

    pub fn queues(&self) -> &[vk::Queue] {
        &self.queues
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn is_destroyed(&self) -> bool {
        self.device.is_none()
    }

    /// Tears everything down in dependency order. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        debug!("manager destroy started");

        let Some(device) = self.device.take() else {
            warn!("manager destroy reached with no device; nothing to do");
            return;
        };

        if self.config.manage_resources {
            let sequences = self.sequences.destroy_all();
            debug!(count = sequences, "destroyed tracked sequences");
            let algorithms = self.algorithms.destroy_all();
            debug!(count = algorithms, "destroyed tracked algorithms");
            let tensors = self.tensors.destroy_all();
            debug!(count = tensors, "destroyed tracked tensors");
        }

        // Queues die with the device.
        self.queues.clear();

        let driver = Arc::clone(&self.driver);
        // Our own per-device state goes first, borrowed device or not.
        driver.release_device(device.handle());
        if device.release(|d| driver.destroy_device(d)) {
            info!("destroyed device");
        } else {
            debug!("released borrowed device");
        }

        let Some(instance) = self.instance.take() else {
            error!("manager destroy reached with no instance");
            return;
        };

        if let Some(callbacks) = self.debug_callbacks.take() {
            driver.unregister_debug_callbacks(instance.handle(), callbacks);
            debug!("unregistered debug callbacks");
        }

        if instance.release(|i| driver.destroy_instance(i)) {
            debug!("destroyed instance");
        } else {
            debug!("released borrowed instance");
        }
    }
}

/// One invocation per element along x, at least one.
fn default_workgroup(elements: usize) -> Result<[u32; 3]> {
    let x = u32::try_from(elements.max(1)).map_err(|_| {
        Error::InvalidState(format!(
            "tensor has {elements} elements, too many for a default workgroup; use algorithm_with"
        ))
    })?;
    Ok([x, 1, 1])
}

impl<D: Driver> Drop for Manager<D> {
    fn drop(&mut self) {
        if !self.is_destroyed() {
            self.destroy();
        }
    }
}
