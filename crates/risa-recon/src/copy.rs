use std::collections::BTreeMap;
use std::sync::Arc;

use bytemuck::Pod;

use risa_core::{ConfigReader, Result};
use risa_device::{
    pool::register_per_device, DeviceId, DeviceRegistry, Image, MemoryPool, Residency, Stream,
    StreamPriority,
};
use risa_pipeline::Transform;

/// Uploads host sinograms into device-resident pool buffers.
///
/// This is where multi-accelerator scheduling happens: the fan-out routes
/// host frames round-robin, and the upload stamps the owning device id
/// that every later stage routes by. Upload copies run at the lowest
/// stream priority so they never starve in-flight kernels.
pub struct HostToDevice<T: Pod + Send + 'static> {
    pool: Arc<MemoryPool<T>>,
    registrations: BTreeMap<DeviceId, usize>,
}

impl<T: Pod + Send + 'static> HostToDevice<T> {
    pub fn new(
        cfg: &ConfigReader,
        registry: &DeviceRegistry,
        pool: Arc<MemoryPool<T>>,
        elements: usize,
    ) -> Result<Self> {
        let pool_size = cfg.pool_size("h2d")?;
        let registrations =
            register_per_device(&pool, registry.devices(), pool_size, elements);
        Ok(Self {
            pool,
            registrations,
        })
    }
}

impl<T: Pod + Send + 'static> Transform for HostToDevice<T> {
    type In = T;
    type Out = T;

    fn name(&self) -> &'static str {
        "h2d"
    }

    fn priority(&self) -> StreamPriority {
        StreamPriority::Low
    }

    fn run(&self, device: DeviceId, stream: &Stream, input: Image<T>) -> Result<Image<T>> {
        let buffer = self.pool.request_memory(self.registrations[&device])?;
        let mut output = Image::new(buffer, input.width(), input.height());
        output.inherit_meta(&input);
        output.set_device(device);

        let job = stream.submit(move || {
            let mut output = output;
            output.data_mut().copy_from_slice(input.data());
            output
        });
        Ok(job.wait())
    }
}

/// Downloads finished images back into pinned host buffers for the writer.
///
/// Runs at the highest stream priority to drain completed work quickly.
pub struct DeviceToHost<T: Pod + Send + 'static> {
    pool: Arc<MemoryPool<T>>,
    registration: usize,
}

impl<T: Pod + Send + 'static> DeviceToHost<T> {
    pub fn new(cfg: &ConfigReader, pool: Arc<MemoryPool<T>>, elements: usize) -> Result<Self> {
        let pool_size = cfg.pool_size("d2h")?;
        let registration = pool.register_stage(pool_size, elements, Residency::Host);
        Ok(Self {
            pool,
            registration,
        })
    }
}

impl<T: Pod + Send + 'static> Transform for DeviceToHost<T> {
    type In = T;
    type Out = T;

    fn name(&self) -> &'static str {
        "d2h"
    }

    fn priority(&self) -> StreamPriority {
        StreamPriority::High
    }

    fn run(&self, _device: DeviceId, stream: &Stream, input: Image<T>) -> Result<Image<T>> {
        let buffer = self.pool.request_memory(self.registration)?;
        let mut output = Image::new(buffer, input.width(), input.height());
        output.inherit_meta(&input);

        let job = stream.submit(move || {
            let mut output = output;
            output.data_mut().copy_from_slice(input.data());
            output
        });
        Ok(job.wait())
    }
}
