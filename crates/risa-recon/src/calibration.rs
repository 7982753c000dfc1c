use std::path::Path;

use risa_core::{ConfigReader, Result, RisaError, ScanGeometry};

use crate::reorder::detector_permutation;

/// Reference measurements always ship 500 frames per module.
pub const REFERENCE_FRAMES: usize = 500;

/// Averaged dark and reference measurements, fan-detector ordered.
///
/// The raw `.fx` files are module-major like the live stream; averages are
/// permuted into fan order at load time so they line up with reordered
/// sinograms inside the attenuation kernel.
pub struct CalibrationAverages {
    dark: Vec<f32>,
    reference: Vec<f32>,
    planes: usize,
    detectors: usize,
}

impl CalibrationAverages {
    /// Load and average the per-module calibration files.
    ///
    /// Expects `dark_192.168.100_DetModNr_<i>.fx` and
    /// `ref_empty_tomograph_repaired_DetModNr_<i>.fx` for modules
    /// `i ∈ [1..=M]` under the configured `inputs[]` directories. Missing
    /// or truncated files fail construction.
    pub fn load(cfg: &ConfigReader, geometry: &ScanGeometry) -> Result<Self> {
        let dark_dir = cfg.input_path("dark")?;
        let reference_dir = cfg.input_path("reference")?;
        let dark_frames: usize = cfg.get("number_of_reference_frames")?;

        let dark_md = average_modules(&dark_dir, "dark_192.168.100_DetModNr_", dark_frames, geometry)?;
        let reference_md = average_modules(
            &reference_dir,
            "ref_empty_tomograph_repaired_DetModNr_",
            REFERENCE_FRAMES,
            geometry,
        )?;

        let permutation = detector_permutation(geometry);
        let detectors = geometry.fan_detectors;
        let mut dark = vec![0.0f32; geometry.planes * detectors];
        let mut reference = vec![0.0f32; geometry.planes * detectors];
        for plane in 0..geometry.planes {
            for (fan, &md) in permutation.iter().enumerate() {
                dark[plane * detectors + fan] = dark_md[plane * detectors + md];
                reference[plane * detectors + fan] = reference_md[plane * detectors + md];
            }
        }

        tracing::info!(
            planes = geometry.planes,
            detectors,
            dark_frames,
            "calibration averages loaded"
        );
        Ok(Self {
            dark,
            reference,
            planes: geometry.planes,
            detectors,
        })
    }

    /// Build averages directly from per-plane tables, for tests and tools.
    pub fn from_tables(dark: Vec<f32>, reference: Vec<f32>, planes: usize) -> Result<Self> {
        if planes == 0 || dark.len() != reference.len() || dark.len() % planes != 0 {
            return Err(RisaError::Calibration(
                "dark/reference tables must share a per-plane shape".into(),
            ));
        }
        let detectors = dark.len() / planes;
        Ok(Self {
            dark,
            reference,
            planes,
            detectors,
        })
    }

    pub fn planes(&self) -> usize {
        self.planes
    }

    pub fn detectors(&self) -> usize {
        self.detectors
    }

    /// Dark average row for a plane, fan-detector indexed.
    pub fn dark(&self, plane: u32) -> &[f32] {
        let plane = plane as usize % self.planes;
        &self.dark[plane * self.detectors..(plane + 1) * self.detectors]
    }

    /// Reference average row for a plane, fan-detector indexed.
    pub fn reference(&self, plane: u32) -> &[f32] {
        let plane = plane as usize % self.planes;
        &self.reference[plane * self.detectors..(plane + 1) * self.detectors]
    }
}

/// Average every module file into a `[plane][module-major detector]` table.
fn average_modules(
    dir: &Path,
    prefix: &str,
    frames: usize,
    geometry: &ScanGeometry,
) -> Result<Vec<f32>> {
    let per_module = geometry.detectors_per_module();
    let mut averages = vec![0.0f32; geometry.planes * geometry.fan_detectors];

    for module in 0..geometry.modules {
        let path = dir.join(format!("{prefix}{}.fx", module + 1));
        let module_avg = average_module_file(&path, frames, geometry)?;
        for plane in 0..geometry.planes {
            let dst =
                plane * geometry.fan_detectors + module * per_module;
            averages[dst..dst + per_module]
                .copy_from_slice(&module_avg[plane * per_module..(plane + 1) * per_module]);
        }
    }
    Ok(averages)
}

/// Average one module's packed `[frame][plane][projection][detector]` file
/// over frames and projections.
fn average_module_file(path: &Path, frames: usize, geometry: &ScanGeometry) -> Result<Vec<f32>> {
    let per_module = geometry.detectors_per_module();
    let expected = frames * geometry.planes * geometry.projections * per_module;

    let bytes = std::fs::read(path).map_err(|e| {
        RisaError::Calibration(format!("cannot read `{}`: {e}", path.display()))
    })?;
    if bytes.len() != expected * 2 {
        return Err(RisaError::Calibration(format!(
            "`{}` holds {} bytes, expected {} ({} frames)",
            path.display(),
            bytes.len(),
            expected * 2,
            frames
        )));
    }
    let samples: Vec<u16> = bytemuck::pod_collect_to_vec(&bytes);

    let mut acc = vec![0.0f64; geometry.planes * per_module];
    let mut cursor = 0;
    for _frame in 0..frames {
        for plane in 0..geometry.planes {
            for _projection in 0..geometry.projections {
                let row = &samples[cursor..cursor + per_module];
                let dst = &mut acc[plane * per_module..(plane + 1) * per_module];
                for (slot, &sample) in dst.iter_mut().zip(row) {
                    *slot += sample as f64;
                }
                cursor += per_module;
            }
        }
    }

    let weight = (frames * geometry.projections) as f64;
    Ok(acc.iter().map(|&sum| (sum / weight) as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn geometry() -> ScanGeometry {
        ScanGeometry {
            fan_detectors: 8,
            projections: 2,
            planes: 2,
            modules: 2,
        }
    }

    fn write_module_file(dir: &Path, name: &str, frames: usize, g: &ScanGeometry, base: u16) {
        let per_module = g.detectors_per_module();
        // Constant across frames/projections so the average is exact and
        // easy to assert.
        let mut samples = Vec::new();
        for _frame in 0..frames {
            for plane in 0..g.planes {
                for _projection in 0..g.projections {
                    for det in 0..per_module {
                        samples.push(base + (plane * 10 + det) as u16);
                    }
                }
            }
        }
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(bytemuck::cast_slice(&samples)).unwrap();
    }

    #[test]
    fn averages_are_per_plane_and_fan_ordered() {
        let g = geometry();
        let dir = tempfile::tempdir().unwrap();
        for module in 1..=2 {
            write_module_file(
                dir.path(),
                &format!("dark_192.168.100_DetModNr_{module}.fx"),
                3,
                &g,
                (module as u16) * 100,
            );
            write_module_file(
                dir.path(),
                &format!("ref_empty_tomograph_repaired_DetModNr_{module}.fx"),
                REFERENCE_FRAMES,
                &g,
                (module as u16) * 100 + 50,
            );
        }

        let cfg = ConfigReader::from_str(&format!(
            r#"{{
                "number_of_reference_frames": 3,
                "inputs": [
                    {{"inputtype": "dark", "inputpath": {dir:?}}},
                    {{"inputtype": "reference", "inputpath": {dir:?}}}
                ]
            }}"#,
            dir = dir.path().to_str().unwrap()
        ))
        .unwrap();

        let averages = CalibrationAverages::load(&cfg, &g).unwrap();

        // Fan detector 0 is module 0 det 0; fan detector 1 is module 1 det 0.
        assert_eq!(averages.dark(0)[0], 100.0);
        assert_eq!(averages.dark(0)[1], 200.0);
        // Plane 1 shifts by 10; fan detector 2 is module 0 det 1.
        assert_eq!(averages.dark(1)[2], 111.0);
        assert_eq!(averages.reference(0)[0], 150.0);
    }

    #[test]
    fn truncated_file_fails_loudly() {
        let g = geometry();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dark_192.168.100_DetModNr_1.fx"), [0u8; 10]).unwrap();
        write_module_file(
            dir.path(),
            "dark_192.168.100_DetModNr_2.fx",
            3,
            &g,
            0,
        );

        let cfg = ConfigReader::from_str(&format!(
            r#"{{
                "number_of_reference_frames": 3,
                "inputs": [
                    {{"inputtype": "dark", "inputpath": {dir:?}}},
                    {{"inputtype": "reference", "inputpath": {dir:?}}}
                ]
            }}"#,
            dir = dir.path().to_str().unwrap()
        ))
        .unwrap();
        assert!(CalibrationAverages::load(&cfg, &g).is_err());
    }
}
