use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use risa_core::{ConfigReader, Result, RisaError, ScanGeometry};
use risa_device::{Image, MemoryPool, Residency};
use risa_pipeline::{Message, SourceStage};

use crate::module::ModuleReceiver;
use crate::notification::FrameNotification;
use crate::ring::ModuleRing;

/// Forwarded-frame count between progress log lines.
const PROGRESS_INTERVAL: u64 = 1000;

/// Assembles completed frames from the module rings into full sinograms
/// and feeds them into the pipeline.
///
/// Backpressure: when downstream stages cannot keep up, `load` blocks in
/// the memory pool while the receive sockets keep rolling the rings; older
/// frames fall off and are accounted as losses. Dropping raw frames is
/// preferable to stalling the detector.
pub struct Receiver {
    notification: Arc<FrameNotification>,
    rings: Vec<Arc<ModuleRing>>,
    pool: Arc<MemoryPool<u16>>,
    registration: usize,
    geometry: ScanGeometry,
    depth: u64,
    module_threads: Vec<JoinHandle<()>>,
    local_addrs: Vec<SocketAddr>,
    forwarded: u64,
}

impl Receiver {
    /// Bind all module sockets, start their receive threads and register
    /// the sinogram pool slot.
    pub fn new(cfg: &ConfigReader, pool: Arc<MemoryPool<u16>>) -> Result<Self> {
        let geometry = ScanGeometry::from_config(cfg)?;
        let depth: u64 = cfg.get("inputBufferSize")?;
        if depth == 0 {
            return Err(RisaError::Config("inputBufferSize must be non-zero".into()));
        }
        let samples_per_packet: usize =
            cfg.get_or("samples_per_packet", geometry.detectors_per_module())?;
        let notification_depth: usize = cfg.get_or("notification_depth", 27)?;
        let timeout = Duration::from_millis(cfg.get_or("receiver_timeout_ms", 2000u64)?);
        let address: String = cfg.get_or("receiver_address", "0.0.0.0".to_string())?;
        let base_port: u16 = cfg.get_or("receiver_base_port", 4000u16)?;
        let pool_size: usize = cfg.get_or("mempoolsize_receiver", 100)?;

        let notification = Arc::new(FrameNotification::new(
            geometry.modules,
            notification_depth,
            depth,
        )?);

        let mut rings = Vec::with_capacity(geometry.modules);
        let mut modules = Vec::with_capacity(geometry.modules);
        for module_id in 0..geometry.modules {
            let ring = Arc::new(ModuleRing::new(depth as usize, geometry.module_elements()));
            let port = if base_port == 0 {
                0
            } else {
                base_port + module_id as u16
            };
            let module = ModuleReceiver::bind(
                &address,
                port,
                module_id,
                geometry,
                samples_per_packet,
                timeout,
                Arc::clone(&ring),
                Arc::clone(&notification),
            )?;
            rings.push(ring);
            modules.push(module);
        }
        let local_addrs = modules.iter().map(|m| m.local_addr()).collect();

        let mut module_threads = Vec::with_capacity(modules.len());
        for (module_id, module) in modules.into_iter().enumerate() {
            let handle = std::thread::Builder::new()
                .name(format!("risa-recv-m{module_id}"))
                .spawn(move || module.run())
                .map_err(|e| {
                    RisaError::Receiver(format!("cannot spawn module thread: {e}"))
                })?;
            module_threads.push(handle);
        }

        let registration =
            pool.register_stage(pool_size, geometry.sinogram_elements(), Residency::Host);

        tracing::info!(
            modules = geometry.modules,
            ring_depth = depth,
            pool_size,
            "receiver listening"
        );

        Ok(Self {
            notification,
            rings,
            pool,
            registration,
            geometry,
            depth,
            module_threads,
            local_addrs,
            forwarded: 0,
        })
    }

    /// Socket addresses the module receivers actually bound (ephemeral
    /// ports resolve here).
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Frames dropped so far (stale slots, overflow, never-completed).
    pub fn lost_frames(&self) -> u64 {
        self.notification.lost()
    }

    pub fn forwarded_frames(&self) -> u64 {
        self.forwarded
    }

    /// Stitch the module stripes of frame `index` into one sinogram.
    fn assemble(&self, index: u64) -> Result<Image<u16>> {
        let buffer = self.pool.request_memory(self.registration)?;
        let mut image = Image::new(buffer, self.geometry.fan_detectors, self.geometry.projections);

        let stripe = self.geometry.module_elements();
        let data = image.data_mut();
        for (module, ring) in self.rings.iter().enumerate() {
            ring.read_frame(index, &mut data[module * stripe..(module + 1) * stripe]);
        }

        image.set_index(index);
        image.set_plane(self.geometry.plane_of(index));
        image.set_start(Instant::now());
        Ok(image)
    }
}

impl SourceStage for Receiver {
    type Output = Image<u16>;

    fn load(&mut self) -> Message<Image<u16>> {
        loop {
            let Some(index) = self.notification.fetch() else {
                for handle in self.module_threads.drain(..) {
                    let _ = handle.join();
                }
                tracing::info!(
                    forwarded = self.forwarded,
                    lost = self.notification.lost(),
                    "all modules finished, receiver shutting down"
                );
                return Message::EndOfStream;
            };

            // The frame may have gone stale while we were backpressured;
            // its ring slot has been overwritten by now.
            if self.notification.frontier() >= index + self.depth {
                self.notification.add_lost(1);
                tracing::warn!(index, "frame rolled off the ring before assembly, dropped");
                continue;
            }

            match self.assemble(index) {
                Ok(image) => {
                    self.forwarded += 1;
                    if self.forwarded % PROGRESS_INTERVAL == 0 {
                        tracing::info!(
                            forwarded = self.forwarded,
                            lost = self.notification.lost(),
                            "receiver progress"
                        );
                    }
                    return Message::Frame(image);
                }
                Err(e) => {
                    tracing::error!(index, error = %e, "sinogram assembly failed, ending stream");
                    return Message::EndOfStream;
                }
            }
        }
    }
}
