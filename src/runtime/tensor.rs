use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::Driver;
use crate::error::{Error, Result};
use crate::runtime::manager::Tracked;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TensorDataType {
    Bool,
    Int,
    UnsignedInt,
    Float,
    Double,
}

/// Element types a tensor can be built from directly.
pub trait TensorElement: bytemuck::Pod {
    const DATA_TYPE: TensorDataType;
}

impl TensorElement for f32 {
    const DATA_TYPE: TensorDataType = TensorDataType::Float;
}

impl TensorElement for f64 {
    const DATA_TYPE: TensorDataType = TensorDataType::Double;
}

impl TensorElement for i32 {
    const DATA_TYPE: TensorDataType = TensorDataType::Int;
}

impl TensorElement for u32 {
    const DATA_TYPE: TensorDataType = TensorDataType::UnsignedInt;
}

pub(crate) const TENSOR_BUFFER_USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::from_raw(
    vk::BufferUsageFlags::STORAGE_BUFFER.as_raw()
        | vk::BufferUsageFlags::UNIFORM_BUFFER.as_raw()
        | vk::BufferUsageFlags::TRANSFER_SRC.as_raw()
        | vk::BufferUsageFlags::TRANSFER_DST.as_raw(),
);

/// A host-side array mirrored by one device buffer.
///
/// Moving bytes between the two copies is the job of the command layer; the
/// tensor only owns the storage and its lifetime.
pub struct Tensor<D: Driver> {
    driver: Arc<D>,
    device: D::Device,
    data_type: TensorDataType,
    element_size: usize,
    element_count: usize,
    descriptor_type: Mutex<vk::DescriptorType>,
    host: Mutex<Vec<u8>>,
    buffer: Mutex<Option<D::Buffer>>,
}

impl<D: Driver> fmt::Debug for Tensor<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("data_type", &self.data_type)
            .field("element_count", &self.element_count)
            .field("element_size", &self.element_size)
            .field("init", &self.is_init())
            .finish()
    }
}

impl<D: Driver> Tensor<D> {
    pub(crate) fn new(
        driver: Arc<D>,
        device: D::Device,
        bytes: &[u8],
        element_count: usize,
        element_size: usize,
        data_type: TensorDataType,
    ) -> Result<Self> {
        let expected = element_count.checked_mul(element_size).filter(|_| element_size != 0);
        if expected != Some(bytes.len()) {
            return Err(Error::InvalidState(format!(
                "tensor data is {} bytes, expected {element_count} elements of {element_size} bytes",
                bytes.len()
            )));
        }

        let buffer = driver.create_buffer(&device, bytes.len() as u64, TENSOR_BUFFER_USAGE)?;
        debug!(?data_type, element_count, "tensor created");

        Ok(Self {
            driver,
            device,
            data_type,
            element_size,
            element_count,
            descriptor_type: Mutex::new(vk::DescriptorType::STORAGE_BUFFER),
            host: Mutex::new(bytes.to_vec()),
            buffer: Mutex::new(Some(buffer)),
        })
    }

    pub fn data_type(&self) -> TensorDataType {
        self.data_type
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.element_count
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn memory_size(&self) -> u64 {
        (self.element_count as u64) * (self.element_size as u64)
    }

    pub fn descriptor_type(&self) -> vk::DescriptorType {
        *self.descriptor_type.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Only affects algorithms created after the call.
    pub fn set_descriptor_type(&self, ty: vk::DescriptorType) {
        *self.descriptor_type.lock().unwrap_or_else(PoisonError::into_inner) = ty;
    }

    pub fn raw_data(&self) -> Vec<u8> {
        self.host.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn vector<T: TensorElement>(&self) -> Result<Vec<T>> {
        self.check_type::<T>()?;
        let host = self.host.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(host.chunks_exact(self.element_size).map(bytemuck::pod_read_unaligned::<T>).collect())
    }

    pub fn set_data<T: TensorElement>(&self, data: &[T]) -> Result<()> {
        self.check_type::<T>()?;
        if data.len() != self.element_count {
            return Err(Error::InvalidState(format!(
                "tensor holds {} elements, got {}",
                self.element_count,
                data.len()
            )));
        }
        let mut host = self.host.lock().unwrap_or_else(PoisonError::into_inner);
        host.copy_from_slice(bytemuck::cast_slice(data));
        Ok(())
    }

    pub fn is_init(&self) -> bool {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Locks the device buffer slot; `None` once the tensor is destroyed.
    pub(crate) fn buffer_guard(&self) -> MutexGuard<'_, Option<D::Buffer>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn destroy(&self) {
        let taken = self.buffer.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(buffer) = taken else { return };
        if !self.driver.device_alive(&self.device) {
            warn!(data_type = ?self.data_type, "tensor outlived its device; buffer left to the device owner");
            return;
        }
        self.driver.destroy_buffer(&self.device, buffer);
        debug!(data_type = ?self.data_type, "tensor destroyed");
    }

    fn check_type<T: TensorElement>(&self) -> Result<()> {
        if T::DATA_TYPE != self.data_type || std::mem::size_of::<T>() != self.element_size {
            return Err(Error::InvalidState(format!(
                "tensor holds {:?}, requested {:?}",
                self.data_type,
                T::DATA_TYPE
            )));
        }
        Ok(())
    }
}

impl<D: Driver> Tracked for Tensor<D> {
    fn destroy(&self) {
        Tensor::destroy(self);
    }

    fn is_destroyed(&self) -> bool {
        !self.is_init()
    }
}

impl<D: Driver> Drop for Tensor<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}
