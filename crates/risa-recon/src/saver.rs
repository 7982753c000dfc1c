use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use risa_core::{ConfigReader, Result, RisaError};
use risa_device::{Image, Volume};
use risa_pipeline::SinkStage;

/// Run counters exposed by the saver for the driver summary and tests.
#[derive(Default)]
pub struct SaverStats {
    frames: AtomicU64,
    highest_index: AtomicU64,
}

impl SaverStats {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn highest_index(&self) -> u64 {
        self.highest_index.load(Ordering::Relaxed)
    }
}

/// Collects reconstructed slices per plane and writes them out at the end
/// of the run.
///
/// Keeps the most recent `amount_of_stored_images` slices per plane in a
/// circular fashion; on the sentinel each retained slice is serialised as
/// a 16-bit PGM under `output_path`. Frame-index gaps are expected, since
/// the pipeline gives no global ordering guarantee and the receiver may
/// have dropped frames.
pub struct OfflineSaver {
    volumes: Vec<Volume<f32>>,
    limit: usize,
    output_path: Option<PathBuf>,
    prefix: String,
    stats: Arc<SaverStats>,
}

impl OfflineSaver {
    pub fn new(cfg: &ConfigReader) -> Result<Self> {
        let planes: usize = cfg.get("number_of_planes")?;
        let pixels: usize = cfg.get("number_of_pixels")?;
        if planes == 0 {
            return Err(RisaError::Config("number_of_planes must be non-zero".into()));
        }
        let limit: usize = cfg.get_or("amount_of_stored_images", 100)?;
        let prefix: String = cfg.get_or("output_prefix", "IMG".to_string())?;
        let output_path: String = cfg.get_or("output_path", String::new())?;
        let output_path = if output_path.is_empty() {
            None
        } else {
            Some(PathBuf::from(output_path))
        };

        Ok(Self {
            volumes: (0..planes).map(|_| Volume::new(pixels, pixels)).collect(),
            limit,
            output_path,
            prefix,
            stats: Arc::new(SaverStats::default()),
        })
    }

    /// Counter handle, valid for the whole run even after the saver moved
    /// into the pipeline.
    pub fn stats(&self) -> Arc<SaverStats> {
        Arc::clone(&self.stats)
    }
}

impl SinkStage for OfflineSaver {
    type Input = Image<f32>;

    fn save(&mut self, image: Image<f32>) {
        self.stats.frames.fetch_add(1, Ordering::Relaxed);
        self.stats
            .highest_index
            .fetch_max(image.index(), Ordering::Relaxed);
        tracing::debug!(
            index = image.index(),
            plane = image.plane(),
            latency_ms = image.elapsed().as_secs_f64() * 1000.0,
            "slice complete"
        );

        let plane = image.plane() as usize % self.volumes.len();
        if let Err(e) = self.volumes[plane].push(image) {
            tracing::error!(error = %e, "slice rejected by volume");
            return;
        }
        self.volumes[plane].truncate_front(self.limit);
    }

    fn finish(&mut self) {
        let Some(dir) = &self.output_path else {
            tracing::info!(frames = self.stats.frames(), "run finished, no output path set");
            return;
        };
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::error!(path = %dir.display(), error = %e, "cannot create output directory");
            return;
        }

        let mut written = 0usize;
        for (plane, volume) in self.volumes.iter().enumerate() {
            for slice in volume.iter() {
                let name = format!("{}_plane{}_{:06}.pgm", self.prefix, plane, slice.index());
                match write_pgm(&dir.join(&name), slice) {
                    Ok(()) => written += 1,
                    Err(e) => tracing::error!(name = %name, error = %e, "slice write failed"),
                }
            }
        }
        tracing::info!(
            frames = self.stats.frames(),
            written,
            path = %dir.display(),
            "results written"
        );
    }
}

/// Serialise one slice as a 16-bit binary PGM, min-max scaled.
fn write_pgm(path: &std::path::Path, image: &Image<f32>) -> std::io::Result<()> {
    let data = image.data();
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in data {
        min = min.min(v);
        max = max.max(v);
    }
    let span = if max > min { max - min } else { 1.0 };

    let mut bytes =
        Vec::with_capacity(32 + data.len() * 2);
    bytes.extend_from_slice(format!("P5\n{} {}\n65535\n", image.width(), image.height()).as_bytes());
    for &v in data {
        let scaled = (((v - min) / span) * 65535.0) as u16;
        // PGM stores 16-bit samples most significant byte first.
        bytes.extend_from_slice(&scaled.to_be_bytes());
    }
    std::fs::write(path, bytes)
}
