//! `ash` implementation of [`Driver`].
//!
//! The loader is resolved at runtime (`Entry::load`), so building the crate does
//! not require the Vulkan SDK. Buffer memory comes from a per-device
//! `gpu-allocator` instance that is torn down right before `vkDestroyDevice`.

pub mod debug;

use std::ffi::{c_char, CStr, CString};
use std::sync::{Arc, Mutex};

use ash::extensions::ext::{DebugReport, DebugUtils};
use ash::vk;
use ash::{Entry, Instance};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use tracing::{debug, warn};

use super::{DeviceDescriptor, Driver, InstanceDescriptor, PipelineDescriptor};
use crate::core::device::{DeviceProperties, QueueFamily};
use crate::error::{Error, Result};

pub struct VulkanDriver {
    entry: Entry,
}

impl std::fmt::Debug for VulkanDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDriver").finish_non_exhaustive()
    }
}

impl VulkanDriver {
    pub fn load() -> Result<Self> {
        let entry = unsafe { Entry::load() }.map_err(|e| Error::LoaderUnavailable(e.to_string()))?;
        Ok(Self { entry })
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Wraps a device created elsewhere so the runtime can allocate from it.
    pub fn wrap_device(
        &self,
        instance: &Instance,
        adapter: vk::PhysicalDevice,
        device: ash::Device,
    ) -> Result<VulkanDevice> {
        VulkanDevice::new(instance, adapter, device)
    }
}

/// A logical device plus the allocator that serves its buffers.
#[derive(Clone)]
pub struct VulkanDevice {
    pub raw: ash::Device,
    allocator: Arc<Mutex<Option<Allocator>>>,
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice").field("handle", &self.raw.handle()).finish_non_exhaustive()
    }
}

impl VulkanDevice {
    fn new(instance: &Instance, adapter: vk::PhysicalDevice, raw: ash::Device) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: raw.clone(),
            physical_device: adapter,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| Error::Allocation(e.to_string()))?;

        Ok(Self { raw, allocator: Arc::new(Mutex::new(Some(allocator))) })
    }

    fn release_allocator(&self) {
        match self.allocator.lock() {
            Ok(mut guard) => drop(guard.take()),
            Err(_) => warn!("allocator lock poisoned while releasing device"),
        }
    }

    /// The allocator is dropped exactly when the runtime lets go of the device.
    fn is_alive(&self) -> bool {
        match self.allocator.lock() {
            Ok(guard) => guard.is_some(),
            Err(_) => false,
        }
    }
}

pub struct VulkanDebugCallbacks {
    report_loader: DebugReport,
    report: vk::DebugReportCallbackEXT,
    utils_loader: DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
}

#[derive(Debug)]
pub struct VulkanBuffer {
    pub raw: vk::Buffer,
    allocation: Option<Allocation>,
}

#[derive(Debug, Default)]
pub struct VulkanPipeline {
    pub shader_module: vk::ShaderModule,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub descriptor_pool: vk::DescriptorPool,
    pub descriptor_set: vk::DescriptorSet,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

#[derive(Debug, Default)]
pub struct VulkanCommandBatch {
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    pub fence: vk::Fence,
    pub timestamp_pool: Option<vk::QueryPool>,
}

fn to_cstrings(names: &[String]) -> Result<Vec<CString>> {
    names
        .iter()
        .map(|n| CString::new(n.as_str()).map_err(|_| Error::InvalidState(format!("name contains NUL: {n:?}"))))
        .collect()
}

fn name_from_raw(raw: &[c_char]) -> String {
    unsafe { CStr::from_ptr(raw.as_ptr()) }.to_string_lossy().into_owned()
}

impl Driver for VulkanDriver {
    type Instance = Instance;
    type Device = VulkanDevice;
    type DebugCallbacks = VulkanDebugCallbacks;
    type Buffer = VulkanBuffer;
    type Pipeline = VulkanPipeline;
    type CommandBatch = VulkanCommandBatch;

    fn instance_extensions(&self) -> Result<Vec<String>> {
        let props = self
            .entry
            .enumerate_instance_extension_properties(None)
            .map_err(Error::vulkan("vkEnumerateInstanceExtensionProperties"))?;
        Ok(props.iter().map(|p| name_from_raw(&p.extension_name)).collect())
    }

    fn instance_layers(&self) -> Result<Vec<String>> {
        let props = self
            .entry
            .enumerate_instance_layer_properties()
            .map_err(Error::vulkan("vkEnumerateInstanceLayerProperties"))?;
        Ok(props.iter().map(|p| name_from_raw(&p.layer_name)).collect())
    }

    fn create_instance(&self, desc: &InstanceDescriptor) -> Result<Instance> {
        let app_name = CString::new(desc.application_name.as_str())
            .map_err(|_| Error::InvalidState("application name contains NUL".to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(desc.application_version)
            .engine_name(&app_name)
            .engine_version(desc.application_version)
            .api_version(desc.api_version);

        let extensions = to_cstrings(&desc.extensions)?;
        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|s| s.as_ptr()).collect();
        let layers = to_cstrings(&desc.layers)?;
        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|s| s.as_ptr()).collect();

        let enabled_features = [vk::ValidationFeatureEnableEXT::DEBUG_PRINTF];
        let mut validation_features =
            vk::ValidationFeaturesEXT::builder().enabled_validation_features(&enabled_features);

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);
        if desc.debug_printf {
            create_info = create_info.push_next(&mut validation_features);
        }

        unsafe { self.entry.create_instance(&create_info, None) }.map_err(Error::vulkan("vkCreateInstance"))
    }

    fn register_debug_callbacks(&self, instance: &Instance) -> Result<VulkanDebugCallbacks> {
        let report_loader = DebugReport::new(&self.entry, instance);
        let report_info = vk::DebugReportCallbackCreateInfoEXT::builder()
            .flags(
                vk::DebugReportFlagsEXT::ERROR
                    | vk::DebugReportFlagsEXT::WARNING
                    | vk::DebugReportFlagsEXT::DEBUG
                    | vk::DebugReportFlagsEXT::INFORMATION
                    | vk::DebugReportFlagsEXT::PERFORMANCE_WARNING,
            )
            .pfn_callback(Some(debug::debug_report_callback));
        let report = unsafe { report_loader.create_debug_report_callback(&report_info, None) }
            .map_err(Error::vulkan("vkCreateDebugReportCallbackEXT"))?;

        let utils_loader = DebugUtils::new(&self.entry, instance);
        let utils_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug::debug_utils_callback));
        let messenger = match unsafe { utils_loader.create_debug_utils_messenger(&utils_info, None) } {
            Ok(messenger) => messenger,
            Err(result) => {
                unsafe { report_loader.destroy_debug_report_callback(report, None) };
                return Err(Error::Vulkan { op: "vkCreateDebugUtilsMessengerEXT", result });
            }
        };

        Ok(VulkanDebugCallbacks { report_loader, report, utils_loader, messenger })
    }

    fn unregister_debug_callbacks(&self, _instance: &Instance, callbacks: VulkanDebugCallbacks) {
        unsafe {
            callbacks.report_loader.destroy_debug_report_callback(callbacks.report, None);
            callbacks.utils_loader.destroy_debug_utils_messenger(callbacks.messenger, None);
        }
    }

    fn destroy_instance(&self, instance: &Instance) {
        unsafe { instance.destroy_instance(None) };
    }

    fn enumerate_physical_devices(&self, instance: &Instance) -> Result<Vec<vk::PhysicalDevice>> {
        unsafe { instance.enumerate_physical_devices() }.map_err(Error::vulkan("vkEnumeratePhysicalDevices"))
    }

    fn physical_device_properties(&self, instance: &Instance, adapter: vk::PhysicalDevice) -> DeviceProperties {
        let props = unsafe { instance.get_physical_device_properties(adapter) };
        DeviceProperties {
            name: name_from_raw(&props.device_name),
            kind: props.device_type.into(),
            vendor_id: props.vendor_id,
            device_id: props.device_id,
            api_version: props.api_version,
            driver_version: props.driver_version,
            max_compute_shared_memory_size: props.limits.max_compute_shared_memory_size,
            max_compute_work_group_invocations: props.limits.max_compute_work_group_invocations,
            max_compute_work_group_count: props.limits.max_compute_work_group_count,
            max_push_constants_size: props.limits.max_push_constants_size,
            timestamp_period: props.limits.timestamp_period,
        }
    }

    fn queue_families(&self, instance: &Instance, adapter: vk::PhysicalDevice) -> Vec<QueueFamily> {
        unsafe { instance.get_physical_device_queue_family_properties(adapter) }
            .iter()
            .map(|qf| QueueFamily {
                flags: qf.queue_flags,
                queue_count: qf.queue_count,
                timestamp_valid_bits: qf.timestamp_valid_bits,
            })
            .collect()
    }

    fn device_extensions(&self, instance: &Instance, adapter: vk::PhysicalDevice) -> Result<Vec<String>> {
        let props = unsafe { instance.enumerate_device_extension_properties(adapter) }
            .map_err(Error::vulkan("vkEnumerateDeviceExtensionProperties"))?;
        Ok(props.iter().map(|p| name_from_raw(&p.extension_name)).collect())
    }

    fn create_device(
        &self,
        instance: &Instance,
        adapter: vk::PhysicalDevice,
        desc: &DeviceDescriptor,
    ) -> Result<VulkanDevice> {
        let priorities: Vec<Vec<f32>> = desc.queues.iter().map(|q| vec![1.0; q.count as usize]).collect();
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = desc
            .queues
            .iter()
            .zip(&priorities)
            .map(|(q, p)| vk::DeviceQueueCreateInfo::builder().queue_family_index(q.family).queue_priorities(p).build())
            .collect();

        let extensions = to_cstrings(&desc.extensions)?;
        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|s| s.as_ptr()).collect();
        let layers = to_cstrings(&desc.layers)?;
        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|s| s.as_ptr()).collect();

        #[allow(deprecated)]
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let raw = unsafe { instance.create_device(adapter, &create_info, None) }
            .map_err(Error::vulkan("vkCreateDevice"))?;

        VulkanDevice::new(instance, adapter, raw.clone()).map_err(|e| {
            unsafe { raw.destroy_device(None) };
            e
        })
    }

    fn get_queue(&self, device: &VulkanDevice, family: u32, index: u32) -> vk::Queue {
        unsafe { device.raw.get_device_queue(family, index) }
    }

    fn release_device(&self, device: &VulkanDevice) {
        if !device.is_alive() {
            return;
        }
        unsafe {
            if let Err(e) = device.raw.device_wait_idle() {
                warn!(error = ?e, "vkDeviceWaitIdle failed before releasing device memory");
            }
        }
        // Allocations must be released before the device goes away.
        device.release_allocator();
    }

    fn device_alive(&self, device: &VulkanDevice) -> bool {
        device.is_alive()
    }

    fn destroy_device(&self, device: &VulkanDevice) {
        self.release_device(device);
        unsafe { device.raw.destroy_device(None) };
    }

    fn create_buffer(&self, device: &VulkanDevice, size: u64, usage: vk::BufferUsageFlags) -> Result<VulkanBuffer> {
        let mut guard = device.allocator.lock().map_err(|_| Error::InvalidState("allocator lock poisoned".into()))?;
        let allocator = guard.as_mut().ok_or_else(|| Error::InvalidState("device already destroyed".into()))?;

        unsafe {
            let buffer_info = vk::BufferCreateInfo::builder()
                .size(size.max(1))
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            let raw = device.raw.create_buffer(&buffer_info, None).map_err(Error::vulkan("vkCreateBuffer"))?;
            let requirements = device.raw.get_buffer_memory_requirements(raw);

            let allocation = match allocator.allocate(&AllocationCreateDesc {
                name: "vkrt-tensor",
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            }) {
                Ok(allocation) => allocation,
                Err(e) => {
                    device.raw.destroy_buffer(raw, None);
                    return Err(Error::Allocation(e.to_string()));
                }
            };

            if let Err(result) = device.raw.bind_buffer_memory(raw, allocation.memory(), allocation.offset()) {
                device.raw.destroy_buffer(raw, None);
                let _ = allocator.free(allocation);
                return Err(Error::Vulkan { op: "vkBindBufferMemory", result });
            }

            Ok(VulkanBuffer { raw, allocation: Some(allocation) })
        }
    }

    fn destroy_buffer(&self, device: &VulkanDevice, mut buffer: VulkanBuffer) {
        if !device.is_alive() {
            warn!("buffer outlived its device; skipping vkDestroyBuffer");
            return;
        }
        unsafe { device.raw.destroy_buffer(buffer.raw, None) };
        if let Some(allocation) = buffer.allocation.take() {
            match device.allocator.lock() {
                Ok(mut guard) => {
                    if let Some(allocator) = guard.as_mut() {
                        if let Err(e) = allocator.free(allocation) {
                            warn!(error = %e, "failed to free buffer allocation");
                        }
                    }
                }
                Err(_) => warn!("allocator lock poisoned while freeing buffer"),
            }
        }
    }

    fn create_pipeline(&self, device: &VulkanDevice, desc: &PipelineDescriptor<'_, VulkanBuffer>) -> Result<VulkanPipeline> {
        let mut pipeline = VulkanPipeline::default();
        match unsafe { build_pipeline(&device.raw, desc, &mut pipeline) } {
            Ok(()) => Ok(pipeline),
            Err(e) => {
                unsafe { destroy_pipeline_parts(&device.raw, &pipeline) };
                Err(e)
            }
        }
    }

    fn destroy_pipeline(&self, device: &VulkanDevice, pipeline: VulkanPipeline) {
        if !device.is_alive() {
            warn!("pipeline outlived its device; skipping destruction");
            return;
        }
        unsafe { destroy_pipeline_parts(&device.raw, &pipeline) };
    }

    fn create_command_batch(&self, device: &VulkanDevice, queue_family: u32, timestamps: u32) -> Result<VulkanCommandBatch> {
        let mut batch = VulkanCommandBatch::default();
        match unsafe { build_command_batch(&device.raw, queue_family, timestamps, &mut batch) } {
            Ok(()) => Ok(batch),
            Err(e) => {
                unsafe { destroy_command_batch_parts(&device.raw, &batch) };
                Err(e)
            }
        }
    }

    fn destroy_command_batch(&self, device: &VulkanDevice, batch: VulkanCommandBatch) {
        if !device.is_alive() {
            warn!("command batch outlived its device; skipping destruction");
            return;
        }
        unsafe { destroy_command_batch_parts(&device.raw, &batch) };
    }
}

unsafe fn build_pipeline(
    device: &ash::Device,
    desc: &PipelineDescriptor<'_, VulkanBuffer>,
    out: &mut VulkanPipeline,
) -> Result<()> {
    let module_info = vk::ShaderModuleCreateInfo::builder().code(desc.spirv);
    out.shader_module = device.create_shader_module(&module_info, None).map_err(Error::vulkan("vkCreateShaderModule"))?;

    let layout_bindings: Vec<vk::DescriptorSetLayoutBinding> = desc
        .bindings
        .iter()
        .enumerate()
        .map(|(i, b)| {
            vk::DescriptorSetLayoutBinding::builder()
                .binding(i as u32)
                .descriptor_type(b.descriptor_type)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build()
        })
        .collect();
    let set_layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&layout_bindings);
    out.descriptor_set_layout = device
        .create_descriptor_set_layout(&set_layout_info, None)
        .map_err(Error::vulkan("vkCreateDescriptorSetLayout"))?;

    let mut pool_sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for b in &desc.bindings {
        match pool_sizes.iter_mut().find(|p| p.ty == b.descriptor_type) {
            Some(size) => size.descriptor_count += 1,
            None => pool_sizes.push(vk::DescriptorPoolSize { ty: b.descriptor_type, descriptor_count: 1 }),
        }
    }
    let pool_info = vk::DescriptorPoolCreateInfo::builder().max_sets(1).pool_sizes(&pool_sizes);
    out.descriptor_pool = device.create_descriptor_pool(&pool_info, None).map_err(Error::vulkan("vkCreateDescriptorPool"))?;

    let set_layouts = [out.descriptor_set_layout];
    let alloc_info = vk::DescriptorSetAllocateInfo::builder()
        .descriptor_pool(out.descriptor_pool)
        .set_layouts(&set_layouts);
    out.descriptor_set = device
        .allocate_descriptor_sets(&alloc_info)
        .map_err(Error::vulkan("vkAllocateDescriptorSets"))?
        .first()
        .copied()
        .ok_or_else(|| Error::InvalidState("no descriptor set returned".into()))?;

    let buffer_infos: Vec<[vk::DescriptorBufferInfo; 1]> = desc
        .bindings
        .iter()
        .map(|b| [vk::DescriptorBufferInfo { buffer: b.buffer.raw, offset: 0, range: b.size.max(1) }])
        .collect();
    let writes: Vec<vk::WriteDescriptorSet> = desc
        .bindings
        .iter()
        .zip(&buffer_infos)
        .enumerate()
        .map(|(i, (b, info))| {
            vk::WriteDescriptorSet::builder()
                .dst_set(out.descriptor_set)
                .dst_binding(i as u32)
                .descriptor_type(b.descriptor_type)
                .buffer_info(info)
                .build()
        })
        .collect();
    device.update_descriptor_sets(&writes, &[]);

    let push_ranges = [vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::COMPUTE,
        offset: 0,
        size: desc.push_constant_size,
    }];
    let mut layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
    if desc.push_constant_size > 0 {
        layout_info = layout_info.push_constant_ranges(&push_ranges);
    }
    out.pipeline_layout = device.create_pipeline_layout(&layout_info, None).map_err(Error::vulkan("vkCreatePipelineLayout"))?;

    let entry_point = CString::new("main").map_err(|_| Error::InvalidState("entry point".into()))?;
    let stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(out.shader_module)
        .name(&entry_point);
    let compute_info = vk::ComputePipelineCreateInfo::builder().stage(stage.build()).layout(out.pipeline_layout);

    out.pipeline = match device.create_compute_pipelines(vk::PipelineCache::null(), &[compute_info.build()], None) {
        Ok(pipes) => pipes.first().copied().unwrap_or_default(),
        Err((pipes, result)) => {
            for p in pipes.into_iter().filter(|p| *p != vk::Pipeline::null()) {
                device.destroy_pipeline(p, None);
            }
            return Err(Error::Vulkan { op: "vkCreateComputePipelines", result });
        }
    };
    debug!(bindings = desc.bindings.len(), "compute pipeline created");
    Ok(())
}

unsafe fn destroy_pipeline_parts(device: &ash::Device, p: &VulkanPipeline) {
    if p.pipeline != vk::Pipeline::null() {
        device.destroy_pipeline(p.pipeline, None);
    }
    if p.pipeline_layout != vk::PipelineLayout::null() {
        device.destroy_pipeline_layout(p.pipeline_layout, None);
    }
    // Freeing the pool releases its sets.
    if p.descriptor_pool != vk::DescriptorPool::null() {
        device.destroy_descriptor_pool(p.descriptor_pool, None);
    }
    if p.descriptor_set_layout != vk::DescriptorSetLayout::null() {
        device.destroy_descriptor_set_layout(p.descriptor_set_layout, None);
    }
    if p.shader_module != vk::ShaderModule::null() {
        device.destroy_shader_module(p.shader_module, None);
    }
}

unsafe fn build_command_batch(
    device: &ash::Device,
    queue_family: u32,
    timestamps: u32,
    out: &mut VulkanCommandBatch,
) -> Result<()> {
    let pool_info = vk::CommandPoolCreateInfo::builder()
        .queue_family_index(queue_family)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
    out.command_pool = device.create_command_pool(&pool_info, None).map_err(Error::vulkan("vkCreateCommandPool"))?;

    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(out.command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    out.command_buffer = device
        .allocate_command_buffers(&alloc_info)
        .map_err(Error::vulkan("vkAllocateCommandBuffers"))?
        .first()
        .copied()
        .ok_or_else(|| Error::InvalidState("no command buffer returned".into()))?;

    out.fence = device
        .create_fence(&vk::FenceCreateInfo::builder(), None)
        .map_err(Error::vulkan("vkCreateFence"))?;

    if timestamps > 0 {
        // One extra slot for the reference timestamp written before the first op.
        let query_info = vk::QueryPoolCreateInfo::builder()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(timestamps + 1);
        out.timestamp_pool =
            Some(device.create_query_pool(&query_info, None).map_err(Error::vulkan("vkCreateQueryPool"))?);
    }
    Ok(())
}

unsafe fn destroy_command_batch_parts(device: &ash::Device, b: &VulkanCommandBatch) {
    if let Some(pool) = b.timestamp_pool {
        device.destroy_query_pool(pool, None);
    }
    if b.fence != vk::Fence::null() {
        device.destroy_fence(b.fence, None);
    }
    if b.command_pool != vk::CommandPool::null() {
        if b.command_buffer != vk::CommandBuffer::null() {
            device.free_command_buffers(b.command_pool, &[b.command_buffer]);
        }
        device.destroy_command_pool(b.command_pool, None);
    }
}
