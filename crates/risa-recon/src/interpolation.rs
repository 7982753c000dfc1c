use std::collections::BTreeMap;
use std::sync::Arc;

use risa_core::{ConfigReader, Result, ScanGeometry};
use risa_device::{pool::register_per_device, DeviceId, DeviceRegistry, Image, MemoryPool, Stream};
use risa_pipeline::Transform;

/// Interpolates defect detectors out of the sinogram.
///
/// A detector whose calibration span (reference minus dark) falls outside
/// `[thresh_min, thresh_max]` is either dead or saturated; its readings
/// are replaced per projection by linear interpolation between the nearest
/// healthy neighbours. The defect set is fixed at startup.
pub struct DetectorInterpolation {
    defects: Arc<Vec<bool>>,
    pool: Arc<MemoryPool<f32>>,
    registrations: BTreeMap<DeviceId, usize>,
}

impl DetectorInterpolation {
    pub fn new(
        cfg: &ConfigReader,
        registry: &DeviceRegistry,
        pool: Arc<MemoryPool<f32>>,
        averages: &crate::calibration::CalibrationAverages,
    ) -> Result<Self> {
        let geometry = ScanGeometry::from_config(cfg)?;
        let thresh_min: f64 = cfg.get("thresh_min")?;
        let thresh_max: f64 = cfg.get("thresh_max")?;
        let pool_size = cfg.pool_size("detectorinterpolation")?;

        let defects = Arc::new(find_defects(
            averages,
            geometry.fan_detectors,
            thresh_min as f32,
            thresh_max as f32,
        ));
        let count = defects.iter().filter(|&&d| d).count();
        if count > 0 {
            tracing::info!(defects = count, "defect detectors will be interpolated");
        }

        let registrations = register_per_device(
            &pool,
            registry.devices(),
            pool_size,
            geometry.sinogram_elements(),
        );
        Ok(Self {
            defects,
            pool,
            registrations,
        })
    }
}

impl Transform for DetectorInterpolation {
    type In = f32;
    type Out = f32;

    fn name(&self) -> &'static str {
        "detectorinterpolation"
    }

    fn run(&self, device: DeviceId, stream: &Stream, input: Image<f32>) -> Result<Image<f32>> {
        let buffer = self.pool.request_memory(self.registrations[&device])?;
        let mut output = Image::new(buffer, input.width(), input.height());
        output.inherit_meta(&input);

        let defects = Arc::clone(&self.defects);
        let job = stream.submit(move || {
            let width = input.width();
            let height = input.height();
            for projection in 0..height {
                let row = &input.data()[projection * width..(projection + 1) * width];
                let out_row = &mut output.data_mut()[projection * width..(projection + 1) * width];
                interpolate_row(row, out_row, &defects);
            }
            output
        });
        Ok(job.wait())
    }
}

/// Defect flags per fan detector; a detector is defect when its span lies
/// outside the threshold band on any plane.
fn find_defects(
    averages: &crate::calibration::CalibrationAverages,
    detectors: usize,
    thresh_min: f32,
    thresh_max: f32,
) -> Vec<bool> {
    let mut defects = vec![false; detectors];
    for plane in 0..averages.planes() as u32 {
        let dark = averages.dark(plane);
        let reference = averages.reference(plane);
        for det in 0..detectors {
            let span = reference[det] - dark[det];
            if span < thresh_min || span > thresh_max {
                defects[det] = true;
            }
        }
    }
    defects
}

fn interpolate_row(row: &[f32], out: &mut [f32], defects: &[bool]) {
    let detectors = row.len();
    for det in 0..detectors {
        if !defects[det] {
            out[det] = row[det];
            continue;
        }

        let left = (0..det).rev().find(|&i| !defects[i]);
        let right = (det + 1..detectors).find(|&i| !defects[i]);
        out[det] = match (left, right) {
            (Some(l), Some(r)) => {
                let t = (det - l) as f32 / (r - l) as f32;
                row[l] + (row[r] - row[l]) * t
            }
            (Some(l), None) => row[l],
            (None, Some(r)) => row[r],
            (None, None) => row[det],
        };
    }
}
