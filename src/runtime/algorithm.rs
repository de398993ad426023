use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::backend::{Driver, PipelineBinding, PipelineDescriptor};
use crate::error::{Error, Result};
use crate::runtime::manager::Tracked;
use crate::runtime::tensor::Tensor;

/// A compiled compute shader bound to a fixed list of tensors.
///
/// Holds strong references to its tensors, so they outlive it.
pub struct Algorithm<D: Driver> {
    driver: Arc<D>,
    device: D::Device,
    tensors: Vec<Arc<Tensor<D>>>,
    workgroup: [u32; 3],
    push_constants: Vec<u8>,
    pipeline: Mutex<Option<D::Pipeline>>,
}

impl<D: Driver> fmt::Debug for Algorithm<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Algorithm")
            .field("tensors", &self.tensors.len())
            .field("workgroup", &self.workgroup)
            .field("push_constants", &self.push_constants.len())
            .field("init", &self.is_init())
            .finish()
    }
}

impl<D: Driver> Algorithm<D> {
    pub(crate) fn new(
        driver: Arc<D>,
        device: D::Device,
        tensors: Vec<Arc<Tensor<D>>>,
        spirv: &[u32],
        workgroup: [u32; 3],
        push_constants: &[u8],
    ) -> Result<Self> {
        if spirv.is_empty() {
            return Err(Error::InvalidState("algorithm needs a non-empty SPIR-V module".into()));
        }
        if tensors.is_empty() {
            return Err(Error::InvalidState("algorithm needs at least one tensor".into()));
        }
        for (i, tensor) in tensors.iter().enumerate() {
            if tensors[..i].iter().any(|t| Arc::ptr_eq(t, tensor)) {
                return Err(Error::InvalidState(format!("tensor {i} is bound more than once")));
            }
        }
        if workgroup.contains(&0) {
            return Err(Error::InvalidState(format!("workgroup {workgroup:?} has a zero dimension")));
        }

        let pipeline = Self::build_pipeline(&driver, &device, &tensors, spirv, push_constants.len() as u32)?;
        debug!(tensors = tensors.len(), ?workgroup, "algorithm created");

        Ok(Self {
            driver,
            device,
            tensors,
            workgroup,
            push_constants: push_constants.to_vec(),
            pipeline: Mutex::new(Some(pipeline)),
        })
    }

    fn build_pipeline(
        driver: &D,
        device: &D::Device,
        tensors: &[Arc<Tensor<D>>],
        spirv: &[u32],
        push_constant_size: u32,
    ) -> Result<D::Pipeline> {
        let mut guards = Vec::with_capacity(tensors.len());
        for (i, tensor) in tensors.iter().enumerate() {
            let guard = tensor.buffer_guard();
            if guard.is_none() {
                return Err(Error::InvalidState(format!("tensor {i} was destroyed before binding")));
            }
            guards.push(guard);
        }

        let bindings = guards
            .iter()
            .zip(tensors)
            .filter_map(|(guard, tensor)| {
                guard.as_ref().map(|buffer| PipelineBinding {
                    buffer,
                    descriptor_type: tensor.descriptor_type(),
                    size: tensor.memory_size(),
                })
            })
            .collect();

        driver.create_pipeline(device, &PipelineDescriptor { spirv, bindings, push_constant_size })
    }

    pub fn tensors(&self) -> &[Arc<Tensor<D>>] {
        &self.tensors
    }

    pub fn workgroup(&self) -> [u32; 3] {
        self.workgroup
    }

    pub fn push_constants(&self) -> &[u8] {
        &self.push_constants
    }

    pub fn is_init(&self) -> bool {
        self.pipeline.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Releases the pipeline. The tensors are left alone.
    pub fn destroy(&self) {
        let taken = self.pipeline.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(pipeline) = taken else { return };
        if !self.driver.device_alive(&self.device) {
            warn!("algorithm outlived its device; pipeline left to the device owner");
            return;
        }
        self.driver.destroy_pipeline(&self.device, pipeline);
        debug!("algorithm destroyed");
    }
}

impl<D: Driver> Tracked for Algorithm<D> {
    fn destroy(&self) {
        Algorithm::destroy(self);
    }

    fn is_destroyed(&self) -> bool {
        !self.is_init()
    }
}

impl<D: Driver> Drop for Algorithm<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}
