use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use ash::vk;
use tracing::{debug, warn};

use crate::backend::Driver;
use crate::error::Result;
use crate::runtime::manager::Tracked;

/// A command batch bound to one queue of the manager's device.
///
/// Owns a command pool with a single primary command buffer, a fence, and an
/// optional timestamp query pool. Recording and submission are driven by the
/// operation layer on top of these handles.
pub struct Sequence<D: Driver> {
    driver: Arc<D>,
    device: D::Device,
    physical_device: vk::PhysicalDevice,
    queue: vk::Queue,
    queue_family_index: u32,
    timestamp_capacity: u32,
    batch: Mutex<Option<D::CommandBatch>>,
}

impl<D: Driver> fmt::Debug for Sequence<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("queue", &self.queue)
            .field("queue_family_index", &self.queue_family_index)
            .field("timestamp_capacity", &self.timestamp_capacity)
            .field("init", &self.is_init())
            .finish()
    }
}

impl<D: Driver> Sequence<D> {
    pub(crate) fn new(
        driver: Arc<D>,
        device: D::Device,
        physical_device: vk::PhysicalDevice,
        queue: vk::Queue,
        queue_family_index: u32,
        total_timestamps: u32,
    ) -> Result<Self> {
        let batch = driver.create_command_batch(&device, queue_family_index, total_timestamps)?;
        debug!(queue_family_index, total_timestamps, "sequence created");
        Ok(Self {
            driver,
            device,
            physical_device,
            queue,
            queue_family_index,
            timestamp_capacity: total_timestamps,
            batch: Mutex::new(Some(batch)),
        })
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Timestamps the sequence can record, zero when profiling is off.
    pub fn timestamp_capacity(&self) -> u32 {
        self.timestamp_capacity
    }

    pub fn is_init(&self) -> bool {
        self.batch.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub fn destroy(&self) {
        let taken = self.batch.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(batch) = taken else { return };
        if !self.driver.device_alive(&self.device) {
            warn!(queue_family_index = self.queue_family_index, "sequence outlived its device; command pool left to the device owner");
            return;
        }
        self.driver.destroy_command_batch(&self.device, batch);
        debug!(queue_family_index = self.queue_family_index, "sequence destroyed");
    }
}

impl<D: Driver> Tracked for Sequence<D> {
    fn destroy(&self) {
        Sequence::destroy(self);
    }

    fn is_destroyed(&self) -> bool {
        !self.is_init()
    }
}

impl<D: Driver> Drop for Sequence<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}
