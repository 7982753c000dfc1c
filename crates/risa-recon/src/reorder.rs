use std::collections::BTreeMap;
use std::sync::Arc;

use risa_core::{ConfigReader, Result, ScanGeometry};
use risa_device::{pool::register_per_device, DeviceId, Image, MemoryPool, Stream};
use risa_pipeline::Transform;

/// Reorders raw module-major sinograms into fan-beam detector order.
///
/// The receiver concatenates each module's stripe back to back; physically
/// the modules interleave around the fan, so detector `d` of module `m`
/// sits at fan position `d * modules + m`. The permutation table is
/// computed once from the geometry and shared with the calibration loader
/// so averages line up with reordered data.
pub struct Reordering {
    permutation: Arc<Vec<usize>>,
    pool: Arc<MemoryPool<u16>>,
    registrations: BTreeMap<DeviceId, usize>,
    geometry: ScanGeometry,
}

/// Fan position -> module-major detector id (`module * per_module + det`).
pub fn detector_permutation(geometry: &ScanGeometry) -> Vec<usize> {
    let per_module = geometry.detectors_per_module();
    let mut table = vec![0usize; geometry.fan_detectors];
    for (fan, slot) in table.iter_mut().enumerate() {
        let module = fan % geometry.modules;
        let det = fan / geometry.modules;
        *slot = module * per_module + det;
    }
    table
}

impl Reordering {
    pub fn new(
        cfg: &ConfigReader,
        registry: &risa_device::DeviceRegistry,
        pool: Arc<MemoryPool<u16>>,
    ) -> Result<Self> {
        let geometry = ScanGeometry::from_config(cfg)?;
        let pool_size = cfg.pool_size("reordering")?;
        let registrations = register_per_device(
            &pool,
            registry.devices(),
            pool_size,
            geometry.sinogram_elements(),
        );
        Ok(Self {
            permutation: Arc::new(detector_permutation(&geometry)),
            pool,
            registrations,
            geometry,
        })
    }
}

impl Transform for Reordering {
    type In = u16;
    type Out = u16;

    fn name(&self) -> &'static str {
        "reordering"
    }

    fn run(&self, device: DeviceId, stream: &Stream, input: Image<u16>) -> Result<Image<u16>> {
        let buffer = self.pool.request_memory(self.registrations[&device])?;
        let mut output = Image::new(buffer, input.width(), input.height());
        output.inherit_meta(&input);

        let permutation = Arc::clone(&self.permutation);
        let geometry = self.geometry;
        let job = stream.submit(move || {
            reorder_sinogram(&geometry, &permutation, input.data(), output.data_mut());
            output
        });
        Ok(job.wait())
    }
}

fn reorder_sinogram(
    geometry: &ScanGeometry,
    permutation: &[usize],
    raw: &[u16],
    fan: &mut [u16],
) {
    let per_module = geometry.detectors_per_module();
    let detectors = geometry.fan_detectors;
    for projection in 0..geometry.projections {
        let row = projection * detectors;
        for (fan_det, &md) in permutation.iter().enumerate() {
            let module = md / per_module;
            let det = md % per_module;
            // Raw layout: [module][projection][detector-within-module].
            let raw_idx =
                module * geometry.module_elements() + projection * per_module + det;
            fan[row + fan_det] = raw[raw_idx];
        }
    }
}
