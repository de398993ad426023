//! In-memory `Driver` that records every call, so tests can assert on what the
//! manager asked for and in which order things were torn down.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use vkrt::ash::vk::{self, Handle};
use vkrt::backend::{DeviceDescriptor, Driver, InstanceDescriptor, PipelineDescriptor, QueueRequest};
use vkrt::core::device::{DeviceKind, DeviceProperties, QueueFamily};
use vkrt::{Error, Result};

pub const DEBUG_REPORT: &str = "VK_EXT_debug_report";
pub const DEBUG_UTILS: &str = "VK_EXT_debug_utils";
pub const NON_SEMANTIC_INFO: &str = "VK_KHR_shader_non_semantic_info";
pub const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CreateInstance { id: u64, extensions: Vec<String>, layers: Vec<String>, debug_printf: bool },
    RegisterCallbacks { instance: u64 },
    UnregisterCallbacks { instance: u64 },
    DestroyInstance(u64),
    CreateDevice { id: u64, adapter: usize, queues: Vec<QueueRequest>, extensions: Vec<String>, layers: Vec<String> },
    ReleaseDevice(u64),
    DestroyDevice(u64),
    CreateBuffer { id: u64, size: u64 },
    DestroyBuffer(u64),
    CreatePipeline { id: u64, buffers: Vec<u64>, push_constant_size: u32 },
    DestroyPipeline(u64),
    CreateBatch { id: u64, family: u32, timestamps: u32 },
    DestroyBatch(u64),
}

impl Event {
    pub fn is_teardown(&self) -> bool {
        matches!(
            self,
            Event::UnregisterCallbacks { .. }
                | Event::DestroyInstance(_)
                | Event::DestroyDevice(_)
                | Event::DestroyBuffer(_)
                | Event::DestroyPipeline(_)
                | Event::DestroyBatch(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct FakeAdapter {
    pub name: String,
    pub families: Vec<QueueFamily>,
    pub extensions: Vec<String>,
}

impl FakeAdapter {
    /// Graphics-only family 0, compute families 1 and 2.
    pub fn gpu(name: &str) -> Self {
        Self {
            name: name.to_string(),
            families: vec![
                family(vk::QueueFlags::GRAPHICS, 1),
                family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 4),
                family(vk::QueueFlags::COMPUTE, 2),
            ],
            extensions: vec![NON_SEMANTIC_INFO.to_string(), "VK_KHR_8bit_storage".to_string()],
        }
    }

    pub fn graphics_only(name: &str) -> Self {
        Self { name: name.to_string(), families: vec![family(vk::QueueFlags::GRAPHICS, 1)], extensions: Vec::new() }
    }
}

pub fn family(flags: vk::QueueFlags, queue_count: u32) -> QueueFamily {
    QueueFamily { flags, queue_count, timestamp_valid_bits: 64 }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeInstance {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeDevice {
    pub id: u64,
}

#[derive(Debug)]
pub struct FakeCallbacks {
    pub instance: u64,
}

#[derive(Debug)]
pub struct FakeBuffer {
    pub id: u64,
}

#[derive(Debug)]
pub struct FakePipeline {
    pub id: u64,
}

#[derive(Debug)]
pub struct FakeBatch {
    pub id: u64,
}

#[derive(Debug)]
pub struct FakeDriver {
    pub instance_extensions: Vec<String>,
    pub instance_layers: Vec<String>,
    pub adapters: Vec<FakeAdapter>,
    pub fail_device_creation: bool,
    pub fail_callbacks: bool,
    pub(crate) next_id: AtomicU64,
    pub(crate) log: Mutex<Vec<Event>>,
    pub(crate) released: Mutex<Vec<u64>>,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self {
            instance_extensions: vec![DEBUG_REPORT.to_string(), DEBUG_UTILS.to_string()],
            instance_layers: vec![VALIDATION_LAYER.to_string()],
            adapters: vec![FakeAdapter::gpu("fake-gpu-0")],
            fail_device_creation: false,
            fail_callbacks: false,
            next_id: AtomicU64::new(1),
            log: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
        }
    }
}

impl FakeDriver {
    pub fn with_adapters(adapters: Vec<FakeAdapter>) -> Self {
        Self { adapters, ..Self::default() }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.lock().unwrap().clone()
    }

    pub fn teardown_events(&self) -> Vec<Event> {
        self.events().into_iter().filter(Event::is_teardown).collect()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    fn record(&self, event: Event) {
        self.log.lock().unwrap().push(event);
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn mark_released(&self, device: &FakeDevice) {
        let mut released = self.released.lock().unwrap();
        if !released.contains(&device.id) {
            released.push(device.id);
        }
    }

    fn adapter(&self, handle: vk::PhysicalDevice) -> &FakeAdapter {
        &self.adapters[handle.as_raw() as usize - 1]
    }
}

impl Driver for FakeDriver {
    type Instance = FakeInstance;
    type Device = FakeDevice;
    type DebugCallbacks = FakeCallbacks;
    type Buffer = FakeBuffer;
    type Pipeline = FakePipeline;
    type CommandBatch = FakeBatch;

    fn instance_extensions(&self) -> Result<Vec<String>> {
        Ok(self.instance_extensions.clone())
    }

    fn instance_layers(&self) -> Result<Vec<String>> {
        Ok(self.instance_layers.clone())
    }

    fn create_instance(&self, desc: &InstanceDescriptor) -> Result<FakeInstance> {
        let id = self.next();
        self.record(Event::CreateInstance {
            id,
            extensions: desc.extensions.clone(),
            layers: desc.layers.clone(),
            debug_printf: desc.debug_printf,
        });
        Ok(FakeInstance { id })
    }

    fn register_debug_callbacks(&self, instance: &FakeInstance) -> Result<FakeCallbacks> {
        if self.fail_callbacks {
            return Err(Error::Vulkan { op: "vkCreateDebugUtilsMessengerEXT", result: vk::Result::ERROR_EXTENSION_NOT_PRESENT });
        }
        self.record(Event::RegisterCallbacks { instance: instance.id });
        Ok(FakeCallbacks { instance: instance.id })
    }

    fn unregister_debug_callbacks(&self, _instance: &FakeInstance, callbacks: FakeCallbacks) {
        self.record(Event::UnregisterCallbacks { instance: callbacks.instance });
    }

    fn destroy_instance(&self, instance: &FakeInstance) {
        self.record(Event::DestroyInstance(instance.id));
    }

    fn enumerate_physical_devices(&self, _instance: &FakeInstance) -> Result<Vec<vk::PhysicalDevice>> {
        Ok((1..=self.adapters.len() as u64).map(vk::PhysicalDevice::from_raw).collect())
    }

    fn physical_device_properties(&self, _instance: &FakeInstance, adapter: vk::PhysicalDevice) -> DeviceProperties {
        DeviceProperties {
            name: self.adapter(adapter).name.clone(),
            kind: DeviceKind::Discrete,
            vendor_id: 0x10de,
            device_id: adapter.as_raw() as u32,
            api_version: vk::API_VERSION_1_2,
            driver_version: 1,
            max_compute_shared_memory_size: 48 * 1024,
            max_compute_work_group_invocations: 1024,
            max_compute_work_group_count: [65535; 3],
            max_push_constants_size: 128,
            timestamp_period: 1.0,
        }
    }

    fn queue_families(&self, _instance: &FakeInstance, adapter: vk::PhysicalDevice) -> Vec<QueueFamily> {
        self.adapter(adapter).families.clone()
    }

    fn device_extensions(&self, _instance: &FakeInstance, adapter: vk::PhysicalDevice) -> Result<Vec<String>> {
        Ok(self.adapter(adapter).extensions.clone())
    }

    fn create_device(
        &self,
        _instance: &FakeInstance,
        adapter: vk::PhysicalDevice,
        desc: &DeviceDescriptor,
    ) -> Result<FakeDevice> {
        if self.fail_device_creation {
            return Err(Error::Vulkan { op: "vkCreateDevice", result: vk::Result::ERROR_INITIALIZATION_FAILED });
        }
        let id = self.next();
        self.record(Event::CreateDevice {
            id,
            adapter: adapter.as_raw() as usize - 1,
            queues: desc.queues.clone(),
            extensions: desc.extensions.clone(),
            layers: desc.layers.clone(),
        });
        Ok(FakeDevice { id })
    }

    fn get_queue(&self, device: &FakeDevice, family: u32, index: u32) -> vk::Queue {
        vk::Queue::from_raw((device.id << 32) | (u64::from(family) << 16) | u64::from(index) | 0x8000_0000)
    }

    fn release_device(&self, device: &FakeDevice) {
        self.record(Event::ReleaseDevice(device.id));
        self.mark_released(device);
    }

    fn device_alive(&self, device: &FakeDevice) -> bool {
        !self.released.lock().unwrap().contains(&device.id)
    }

    fn destroy_device(&self, device: &FakeDevice) {
        self.record(Event::DestroyDevice(device.id));
        self.mark_released(device);
    }

    fn create_buffer(&self, _device: &FakeDevice, size: u64, _usage: vk::BufferUsageFlags) -> Result<FakeBuffer> {
        let id = self.next();
        self.record(Event::CreateBuffer { id, size });
        Ok(FakeBuffer { id })
    }

    fn destroy_buffer(&self, _device: &FakeDevice, buffer: FakeBuffer) {
        self.record(Event::DestroyBuffer(buffer.id));
    }

    fn create_pipeline(&self, _device: &FakeDevice, desc: &PipelineDescriptor<'_, FakeBuffer>) -> Result<FakePipeline> {
        let id = self.next();
        self.record(Event::CreatePipeline {
            id,
            buffers: desc.bindings.iter().map(|b| b.buffer.id).collect(),
            push_constant_size: desc.push_constant_size,
        });
        Ok(FakePipeline { id })
    }

    fn destroy_pipeline(&self, _device: &FakeDevice, pipeline: FakePipeline) {
        self.record(Event::DestroyPipeline(pipeline.id));
    }

    fn create_command_batch(&self, _device: &FakeDevice, queue_family: u32, timestamps: u32) -> Result<FakeBatch> {
        let id = self.next();
        self.record(Event::CreateBatch { id, family: queue_family, timestamps });
        Ok(FakeBatch { id })
    }

    fn destroy_command_batch(&self, _device: &FakeDevice, batch: FakeBatch) {
        self.record(Event::DestroyBatch(batch.id));
    }
}

/// Id of the most recent `Create*` event, i.e. of the resource just built.
pub fn last_created_id(driver: &FakeDriver) -> u64 {
    driver
        .events()
        .iter()
        .rev()
        .find_map(|e| match e {
            Event::CreateInstance { id, .. }
            | Event::CreateDevice { id, .. }
            | Event::CreateBuffer { id, .. }
            | Event::CreatePipeline { id, .. }
            | Event::CreateBatch { id, .. } => Some(*id),
            _ => None,
        })
        .unwrap()
}

pub const SPIRV: &[u32] = &[0x0723_0203, 0x0001_0500, 0, 1, 0];
