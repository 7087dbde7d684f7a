//! Headless GPU context for page uploads

use crate::core::error::Error;
use crate::render::gpu::WgpuAllocator;

pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Open the first high-performance adapter without a surface.
    pub async fn new() -> Result<Self, Error> {
        let instance_desc = wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        };
        let instance = wgpu::Instance::new(&instance_desc);

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::Gpu(format!("No suitable adapter found: {:?}", e)))?;

        // 16-bit page textures are optional
        let required_features = adapter.features() & wgpu::Features::TEXTURE_FORMAT_16BIT_NORM;

        let device_desc = wgpu::DeviceDescriptor {
            label: Some("thumb_device"),
            required_features,
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            experimental_features: Default::default(),
            trace: Default::default(),
        };

        let (device, queue) = adapter
            .request_device(&device_desc)
            .await
            .map_err(|e| Error::Gpu(e.to_string()))?;

        log::info!("GPU adapter: {}", adapter.get_info().name);

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    /// Page texture allocator on this device
    pub fn allocator(&self) -> WgpuAllocator {
        WgpuAllocator::new(self.device.clone(), self.queue.clone())
    }
}
