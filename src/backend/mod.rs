use ash::vk;

use crate::core::device::{DeviceProperties, QueueFamily};
use crate::error::Result;

pub mod vulkan;

pub use vulkan::VulkanDriver;

/// Everything an instance creation call needs, already negotiated.
#[derive(Debug, Clone, Default)]
pub struct InstanceDescriptor {
    pub application_name: String,
    pub application_version: u32,
    pub api_version: u32,
    pub extensions: Vec<String>,
    pub layers: Vec<String>,
    /// Chain validation features that turn on shader debug printf.
    pub debug_printf: bool,
}

/// One queue-creation request: `count` queues from `family`, each at priority 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueRequest {
    pub family: u32,
    pub count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceDescriptor {
    pub queues: Vec<QueueRequest>,
    pub extensions: Vec<String>,
    pub layers: Vec<String>,
}

/// A tensor buffer bound to one descriptor slot of a pipeline.
pub struct PipelineBinding<'a, B> {
    pub buffer: &'a B,
    pub descriptor_type: vk::DescriptorType,
    pub size: u64,
}

pub struct PipelineDescriptor<'a, B> {
    pub spirv: &'a [u32],
    pub bindings: Vec<PipelineBinding<'a, B>>,
    pub push_constant_size: u32,
}

/// The calls the runtime makes into a GPU driver.
///
/// Handles that the runtime only ever passes back to the driver are associated
/// types; physical devices and queues are plain Vulkan handles.
pub trait Driver: Send + Sync + 'static {
    type Instance: Clone + Send + Sync;
    type Device: Clone + Send + Sync;
    type DebugCallbacks: Send + Sync;
    type Buffer: Send + Sync;
    type Pipeline: Send + Sync;
    type CommandBatch: Send + Sync;

    // Instance
    fn instance_extensions(&self) -> Result<Vec<String>>;
    fn instance_layers(&self) -> Result<Vec<String>>;
    fn create_instance(&self, desc: &InstanceDescriptor) -> Result<Self::Instance>;
    fn register_debug_callbacks(&self, instance: &Self::Instance) -> Result<Self::DebugCallbacks>;
    fn unregister_debug_callbacks(&self, instance: &Self::Instance, callbacks: Self::DebugCallbacks);
    fn destroy_instance(&self, instance: &Self::Instance);

    // Adapters
    fn enumerate_physical_devices(&self, instance: &Self::Instance) -> Result<Vec<vk::PhysicalDevice>>;
    fn physical_device_properties(&self, instance: &Self::Instance, adapter: vk::PhysicalDevice) -> DeviceProperties;
    fn queue_families(&self, instance: &Self::Instance, adapter: vk::PhysicalDevice) -> Vec<QueueFamily>;
    fn device_extensions(&self, instance: &Self::Instance, adapter: vk::PhysicalDevice) -> Result<Vec<String>>;

    // Device
    fn create_device(
        &self,
        instance: &Self::Instance,
        adapter: vk::PhysicalDevice,
        desc: &DeviceDescriptor,
    ) -> Result<Self::Device>;
    fn get_queue(&self, device: &Self::Device, family: u32, index: u32) -> vk::Queue;
    /// Drops the runtime's own per-device state (memory allocator and the like)
    /// without destroying the device. Runs for owned and borrowed devices alike.
    fn release_device(&self, device: &Self::Device);
    /// False once `release_device` or `destroy_device` ran for this device.
    fn device_alive(&self, device: &Self::Device) -> bool;
    fn destroy_device(&self, device: &Self::Device);

    // Resources
    fn create_buffer(&self, device: &Self::Device, size: u64, usage: vk::BufferUsageFlags) -> Result<Self::Buffer>;
    fn destroy_buffer(&self, device: &Self::Device, buffer: Self::Buffer);
    fn create_pipeline(&self, device: &Self::Device, desc: &PipelineDescriptor<'_, Self::Buffer>) -> Result<Self::Pipeline>;
    fn destroy_pipeline(&self, device: &Self::Device, pipeline: Self::Pipeline);
    fn create_command_batch(&self, device: &Self::Device, queue_family: u32, timestamps: u32) -> Result<Self::CommandBatch>;
    fn destroy_command_batch(&self, device: &Self::Device, batch: Self::CommandBatch);
}
