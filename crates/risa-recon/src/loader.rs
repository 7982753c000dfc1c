use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use risa_core::{ConfigReader, Result, RisaError, ScanGeometry};
use risa_device::{Image, MemoryPool, Residency};
use risa_pipeline::{Message, SourceStage};

/// Replays recorded raw sinograms from disk instead of the live detector.
///
/// The file is a tightly packed `u16` array of whole frames in the same
/// module-major layout the receiver assembles. Frames are numbered from
/// zero in file order. The offline path is also the determinism harness:
/// two runs over the same file must produce bit-identical output.
pub struct OfflineLoader {
    samples: Vec<u16>,
    total_frames: usize,
    cursor: usize,
    pool: Arc<MemoryPool<u16>>,
    registration: usize,
    geometry: ScanGeometry,
}

impl OfflineLoader {
    pub fn new(
        cfg: &ConfigReader,
        pool: Arc<MemoryPool<u16>>,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let geometry = ScanGeometry::from_config(cfg)?;
        let pool_size: usize = cfg.get_or("mempoolsize_loader", 8)?;

        let bytes = std::fs::read(path)
            .map_err(|e| RisaError::Config(format!("cannot read `{}`: {e}", path.display())))?;
        let frame_bytes = geometry.sinogram_elements() * 2;
        if bytes.len() % frame_bytes != 0 {
            return Err(RisaError::Config(format!(
                "`{}` holds {} bytes, not a multiple of the {}-byte frame",
                path.display(),
                bytes.len(),
                frame_bytes
            )));
        }
        let samples: Vec<u16> = bytemuck::pod_collect_to_vec(&bytes);
        let total_frames = samples.len() / geometry.sinogram_elements();

        let registration =
            pool.register_stage(pool_size, geometry.sinogram_elements(), Residency::Host);
        tracing::info!(
            path = %path.display(),
            frames = total_frames,
            "offline loader ready"
        );

        Ok(Self {
            samples,
            total_frames,
            cursor: 0,
            pool,
            registration,
            geometry,
        })
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }
}

impl SourceStage for OfflineLoader {
    type Output = Image<u16>;

    fn load(&mut self) -> Message<Image<u16>> {
        if self.cursor == self.total_frames {
            tracing::info!(frames = self.total_frames, "offline input exhausted");
            return Message::EndOfStream;
        }

        let buffer = match self.pool.request_memory(self.registration) {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::error!(error = %e, "offline loader lost its pool, ending stream");
                return Message::EndOfStream;
            }
        };

        let elements = self.geometry.sinogram_elements();
        let mut image = Image::new(buffer, self.geometry.fan_detectors, self.geometry.projections);
        image
            .data_mut()
            .copy_from_slice(&self.samples[self.cursor * elements..(self.cursor + 1) * elements]);
        image.set_index(self.cursor as u64);
        image.set_plane(self.geometry.plane_of(self.cursor as u64));
        image.set_start(Instant::now());
        self.cursor += 1;
        Message::Frame(image)
    }
}
