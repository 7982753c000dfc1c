use std::collections::BTreeMap;
use std::sync::Arc;

use risa_core::{ConfigReader, Result, RisaError, ScanGeometry};
use risa_device::{pool::register_per_device, DeviceId, DeviceRegistry, Image, MemoryPool, Stream};
use risa_pipeline::Transform;

/// Interpolation used when a ray lands between two detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationType {
    NearestNeighbor,
    Linear,
}

impl InterpolationType {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "nearestNeighbour" | "nearest" => Ok(InterpolationType::NearestNeighbor),
            "linear" => Ok(InterpolationType::Linear),
            other => Err(RisaError::Config(format!(
                "unknown interpolation type `{other}`"
            ))),
        }
    }
}

/// Pixel-driven back projection of a filtered sinogram.
///
/// Each pixel follows its ray through every projection angle and
/// accumulates the interpolated detector sample; the result grid is
/// `number_of_pixels` square.
pub struct Backprojection {
    pixels: usize,
    angles: Arc<Vec<(f32, f32)>>,
    interpolation: InterpolationType,
    pool: Arc<MemoryPool<f32>>,
    registrations: BTreeMap<DeviceId, usize>,
}

impl Backprojection {
    pub fn new(
        cfg: &ConfigReader,
        registry: &DeviceRegistry,
        pool: Arc<MemoryPool<f32>>,
    ) -> Result<Self> {
        let geometry = ScanGeometry::from_config(cfg)?;
        let pixels: usize = cfg.get("number_of_pixels")?;
        if pixels == 0 {
            return Err(RisaError::Config("number_of_pixels must be non-zero".into()));
        }
        let rotation_offset: f64 = cfg.get_or("rotation_offset", 0.0)?;
        let angle_total: f64 = cfg.get_or("backprojection_angle_total", 180.0)?;
        if angle_total <= 0.0 || angle_total > 360.0 {
            return Err(RisaError::Config(format!(
                "backprojection_angle_total {angle_total} outside (0, 360]"
            )));
        }
        let interpolation = InterpolationType::parse(
            &cfg.get_or("interpolation_type", "linear".to_string())?,
        )?;
        let pool_size = cfg.pool_size("backprojection")?;

        // Precompute (sin, cos) per projection once; the kernel only does
        // multiply-adds per pixel.
        let step = angle_total.to_radians() / geometry.projections as f64;
        let offset = rotation_offset.to_radians();
        let angles: Vec<(f32, f32)> = (0..geometry.projections)
            .map(|p| {
                let theta = offset + p as f64 * step;
                (theta.sin() as f32, theta.cos() as f32)
            })
            .collect();

        let registrations =
            register_per_device(&pool, registry.devices(), pool_size, pixels * pixels);
        Ok(Self {
            pixels,
            angles: Arc::new(angles),
            interpolation,
            pool,
            registrations,
        })
    }
}

impl Transform for Backprojection {
    type In = f32;
    type Out = f32;

    fn name(&self) -> &'static str {
        "backprojection"
    }

    fn run(&self, device: DeviceId, stream: &Stream, input: Image<f32>) -> Result<Image<f32>> {
        let buffer = self.pool.request_memory(self.registrations[&device])?;
        let mut output = Image::new(buffer, self.pixels, self.pixels);
        output.inherit_meta(&input);

        let angles = Arc::clone(&self.angles);
        let pixels = self.pixels;
        let interpolation = self.interpolation;
        let job = stream.submit(move || {
            back_project(
                input.data(),
                output.data_mut(),
                input.width(),
                pixels,
                &angles,
                interpolation,
            );
            output
        });
        Ok(job.wait())
    }
}

fn back_project(
    sinogram: &[f32],
    image: &mut [f32],
    detectors: usize,
    pixels: usize,
    angles: &[(f32, f32)],
    interpolation: InterpolationType,
) {
    let half = pixels as f32 / 2.0;
    let detector_scale = (detectors - 1) as f32 / 2.0;
    let norm = std::f32::consts::PI / angles.len() as f32;

    for iy in 0..pixels {
        // Image rows run top-down; the reconstruction grid is centred.
        let y = (half - iy as f32 - 0.5) / half;
        for ix in 0..pixels {
            let x = (ix as f32 + 0.5 - half) / half;
            let mut sum = 0.0f32;
            for (projection, &(sin_t, cos_t)) in angles.iter().enumerate() {
                // Ray coordinate in [-sqrt(2), sqrt(2)], mapped onto the
                // detector axis.
                let t = x * cos_t + y * sin_t;
                let u = (t + 1.0) * detector_scale;
                if u < 0.0 || u > (detectors - 1) as f32 {
                    continue;
                }
                let row = projection * detectors;
                sum += match interpolation {
                    InterpolationType::NearestNeighbor => {
                        sinogram[row + (u + 0.5) as usize]
                    }
                    InterpolationType::Linear => {
                        let lo = u as usize;
                        let hi = (lo + 1).min(detectors - 1);
                        let frac = u - lo as f32;
                        sinogram[row + lo] * (1.0 - frac) + sinogram[row + hi] * frac
                    }
                };
            }
            image[iy * pixels + ix] = sum * norm;
        }
    }
}
