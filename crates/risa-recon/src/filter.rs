use std::collections::BTreeMap;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use risa_core::{ConfigReader, Result, RisaError, ScanGeometry};
use risa_device::{pool::register_per_device, DeviceId, DeviceRegistry, Image, MemoryPool, Stream};
use risa_pipeline::Transform;

/// Filter function applied to the projections in frequency space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    Ramp,
    SheppLogan,
    Cosine,
    Hamming,
    Hanning,
}

impl FilterType {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "ramp" => Ok(FilterType::Ramp),
            "sheppLogan" | "shepp_logan" => Ok(FilterType::SheppLogan),
            "cosine" => Ok(FilterType::Cosine),
            "hamming" => Ok(FilterType::Hamming),
            "hanning" => Ok(FilterType::Hanning),
            other => Err(RisaError::Config(format!("unknown filter type `{other}`"))),
        }
    }
}

/// Filters each projection with the designed filter function.
///
/// Forward FFT over the (zero-padded) detector axis, multiply by the
/// precomputed frequency weights, inverse FFT, renormalise. The plans and
/// weights are created once and shared by all workers.
pub struct Filter {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    weights: Arc<Vec<f32>>,
    fft_len: usize,
    pool: Arc<MemoryPool<f32>>,
    registrations: BTreeMap<DeviceId, usize>,
}

impl Filter {
    pub fn new(
        cfg: &ConfigReader,
        registry: &DeviceRegistry,
        pool: Arc<MemoryPool<f32>>,
    ) -> Result<Self> {
        let geometry = ScanGeometry::from_config(cfg)?;
        let filter_type = FilterType::parse(&cfg.get_or("filter_type", "ramp".to_string())?)?;
        let cutoff: f64 = cfg.get_or("cutoff_fraction", 1.0)?;
        if !(0.0 < cutoff && cutoff <= 1.0) {
            return Err(RisaError::Config(format!(
                "cutoff_fraction {cutoff} outside (0, 1]"
            )));
        }
        let pool_size = cfg.pool_size("filter")?;

        // Pad to the next power of two past twice the detector count to
        // keep the circular convolution from wrapping into the signal.
        let fft_len = (2 * geometry.fan_detectors).next_power_of_two();
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(fft_len);
        let inverse = planner.plan_fft_inverse(fft_len);
        let weights = Arc::new(design_filter(filter_type, cutoff as f32, fft_len));

        tracing::debug!(?filter_type, cutoff, fft_len, "filter designed");

        let registrations = register_per_device(
            &pool,
            registry.devices(),
            pool_size,
            geometry.sinogram_elements(),
        );
        Ok(Self {
            forward,
            inverse,
            weights,
            fft_len,
            pool,
            registrations,
        })
    }
}

impl Transform for Filter {
    type In = f32;
    type Out = f32;

    fn name(&self) -> &'static str {
        "filter"
    }

    fn run(&self, device: DeviceId, stream: &Stream, input: Image<f32>) -> Result<Image<f32>> {
        let buffer = self.pool.request_memory(self.registrations[&device])?;
        let mut output = Image::new(buffer, input.width(), input.height());
        output.inherit_meta(&input);

        let forward = Arc::clone(&self.forward);
        let inverse = Arc::clone(&self.inverse);
        let weights = Arc::clone(&self.weights);
        let fft_len = self.fft_len;
        let job = stream.submit(move || {
            let width = input.width();
            let mut line = vec![Complex::new(0.0f32, 0.0); fft_len];
            let scratch_len = forward
                .get_inplace_scratch_len()
                .max(inverse.get_inplace_scratch_len());
            let mut scratch = vec![Complex::new(0.0f32, 0.0); scratch_len];

            for projection in 0..input.height() {
                let row = &input.data()[projection * width..(projection + 1) * width];
                for (slot, &sample) in line.iter_mut().zip(row) {
                    *slot = Complex::new(sample, 0.0);
                }
                for slot in line.iter_mut().skip(width) {
                    *slot = Complex::new(0.0, 0.0);
                }

                forward.process_with_scratch(&mut line, &mut scratch);
                for (slot, &weight) in line.iter_mut().zip(weights.iter()) {
                    *slot *= weight;
                }
                inverse.process_with_scratch(&mut line, &mut scratch);

                let scale = 1.0 / fft_len as f32;
                let out_row =
                    &mut output.data_mut()[projection * width..(projection + 1) * width];
                for (slot, value) in out_row.iter_mut().zip(line.iter()) {
                    *slot = value.re * scale;
                }
            }
            output
        });
        Ok(job.wait())
    }
}

/// Frequency weights for the chosen filter, symmetric over the FFT bins.
fn design_filter(filter_type: FilterType, cutoff: f32, fft_len: usize) -> Vec<f32> {
    let half = fft_len / 2;
    let mut weights = vec![0.0f32; fft_len];
    for (bin, slot) in weights.iter_mut().enumerate() {
        // Normalised frequency in [0, 1], mirrored over the upper half.
        let f = if bin <= half {
            bin as f32 / half as f32
        } else {
            (fft_len - bin) as f32 / half as f32
        };
        if f > cutoff {
            continue;
        }
        let window = match filter_type {
            FilterType::Ramp => 1.0,
            FilterType::SheppLogan => {
                let x = std::f32::consts::PI * f / (2.0 * cutoff);
                if x.abs() < 1e-6 {
                    1.0
                } else {
                    x.sin() / x
                }
            }
            FilterType::Cosine => (std::f32::consts::PI * f / (2.0 * cutoff)).cos(),
            FilterType::Hamming => {
                0.54 + 0.46 * (std::f32::consts::PI * f / cutoff).cos()
            }
            FilterType::Hanning => {
                0.5 * (1.0 + (std::f32::consts::PI * f / cutoff).cos())
            }
        };
        *slot = f * window;
    }
    weights
}
