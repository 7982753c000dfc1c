use std::collections::BTreeMap;
use std::sync::Arc;

use risa_core::{ConfigReader, Result, RisaError, ScanGeometry};
use risa_device::{pool::register_per_device, DeviceId, DeviceRegistry, Image, MemoryPool, Stream};
use risa_pipeline::Transform;

/// Transmission values are clamped here before the logarithm.
const MIN_TRANSMISSION: f32 = 1.0e-6;

/// Computes attenuation coefficients from raw counts.
///
/// `-ln((v - dark) / (ref - dark))` per sample against the per-plane
/// calibration averages, multiplied by the relevant-area mask that hides
/// regions known to carry no signal from the scanner geometry.
pub struct Attenuation {
    averages: Arc<crate::calibration::CalibrationAverages>,
    mask: Arc<Vec<f32>>,
    pool: Arc<MemoryPool<f32>>,
    registrations: BTreeMap<DeviceId, usize>,
    geometry: ScanGeometry,
}

impl Attenuation {
    pub fn new(
        cfg: &ConfigReader,
        registry: &DeviceRegistry,
        pool: Arc<MemoryPool<f32>>,
        averages: Arc<crate::calibration::CalibrationAverages>,
    ) -> Result<Self> {
        let geometry = ScanGeometry::from_config(cfg)?;
        if averages.detectors() != geometry.fan_detectors {
            return Err(RisaError::Calibration(format!(
                "calibration covers {} detectors, geometry has {}",
                averages.detectors(),
                geometry.fan_detectors
            )));
        }
        let pool_size = cfg.pool_size("attenuation")?;
        let registrations = register_per_device(
            &pool,
            registry.devices(),
            pool_size,
            geometry.sinogram_elements(),
        );
        let mask = Arc::new(relevant_area_mask(cfg, &geometry)?);
        Ok(Self {
            averages,
            mask,
            pool,
            registrations,
            geometry,
        })
    }
}

impl Transform for Attenuation {
    type In = u16;
    type Out = f32;

    fn name(&self) -> &'static str {
        "attenuation"
    }

    fn run(&self, device: DeviceId, stream: &Stream, input: Image<u16>) -> Result<Image<f32>> {
        let buffer = self.pool.request_memory(self.registrations[&device])?;
        let mut output = Image::new(buffer, input.width(), input.height());
        output.inherit_meta(&input);

        let averages = Arc::clone(&self.averages);
        let mask = Arc::clone(&self.mask);
        let detectors = self.geometry.fan_detectors;
        let job = stream.submit(move || {
            let plane = input.plane();
            compute_attenuation(
                input.data(),
                output.data_mut(),
                averages.dark(plane),
                averages.reference(plane),
                &mask,
                detectors,
            );
            output
        });
        Ok(job.wait())
    }
}

fn compute_attenuation(
    raw: &[u16],
    out: &mut [f32],
    dark: &[f32],
    reference: &[f32],
    mask: &[f32],
    detectors: usize,
) {
    for (idx, (&sample, slot)) in raw.iter().zip(out.iter_mut()).enumerate() {
        let det = idx % detectors;
        let span = reference[det] - dark[det];
        let transmission = if span > f32::EPSILON {
            ((sample as f32 - dark[det]) / span).max(MIN_TRANSMISSION)
        } else {
            1.0
        };
        *slot = -transmission.ln() * mask[idx];
    }
}

/// Build the relevant-area mask from the scanner geometry parameters.
///
/// The limited-angle geometry leaves every projection with a valid
/// detector window and every rotation with a valid projection band.
/// `xa..xf` are the breakpoints: `xa,xb,xe,xf` fade the projection band in
/// and out, `xc,xd` bound the fully-open detector window, with linear
/// feathering down to `lower_lim_offset`/`upper_lim_offset`. The fan
/// centre additionally wobbles with `source_offset` over the rotation.
fn relevant_area_mask(cfg: &ConfigReader, geometry: &ScanGeometry) -> Result<Vec<f32>> {
    let source_offset: f64 = cfg.get("source_offset")?;
    let lower_lim: f64 = cfg.get("lower_lim_offset")?;
    let upper_lim: f64 = cfg.get("upper_lim_offset")?;
    let xa: f64 = cfg.get("xa")?;
    let xb: f64 = cfg.get("xb")?;
    let xc: f64 = cfg.get("xc")?;
    let xd: f64 = cfg.get("xd")?;
    let xe: f64 = cfg.get("xe")?;
    let xf: f64 = cfg.get("xf")?;

    let projections = geometry.projections as f64;
    let detectors = geometry.fan_detectors as f64;
    if !(0.0 <= xa && xa <= xb && xb <= xe && xe <= xf && xf <= projections) {
        return Err(RisaError::Config(
            "mask breakpoints must satisfy 0 <= xa <= xb <= xe <= xf <= projections".into(),
        ));
    }
    if !(lower_lim <= xc && xc <= xd && xd <= detectors - upper_lim) {
        return Err(RisaError::Config(
            "detector window must satisfy lower_lim_offset <= xc <= xd <= detectors - upper_lim_offset".into(),
        ));
    }

    let ramp = |x: f64, from: f64, to: f64, rising: bool| -> f64 {
        if (to - from).abs() < f64::EPSILON {
            1.0
        } else {
            let t = ((x - from) / (to - from)).clamp(0.0, 1.0);
            if rising {
                t
            } else {
                1.0 - t
            }
        }
    };

    let mut mask = vec![0.0f32; geometry.sinogram_elements()];
    for projection in 0..geometry.projections {
        let p = projection as f64;
        let row_weight = if p < xa || p >= xf {
            0.0
        } else if p < xb {
            ramp(p, xa, xb, true)
        } else if p < xe {
            1.0
        } else {
            ramp(p, xe, xf, false)
        };
        if row_weight == 0.0 {
            continue;
        }

        let shift =
            source_offset * (2.0 * std::f64::consts::PI * p / projections).sin();
        let row = projection * geometry.fan_detectors;
        for detector in 0..geometry.fan_detectors {
            let d = detector as f64 - shift;
            let det_weight = if d < lower_lim || d >= detectors - upper_lim {
                0.0
            } else if d < xc {
                ramp(d, lower_lim, xc, true)
            } else if d < xd {
                1.0
            } else {
                ramp(d, xd, detectors - upper_lim, false)
            };
            mask[row + detector] = (row_weight * det_weight) as f32;
        }
    }
    Ok(mask)
}
