use crate::config::ConfigReader;
use crate::error::{Result, RisaError};

/// Static acquisition geometry shared by the receiver and all stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanGeometry {
    /// Detectors per projection in the fan beam sinogram.
    pub fan_detectors: usize,
    /// Projections per frame (full rotation).
    pub projections: usize,
    /// Axial planes the scanner interleaves.
    pub planes: usize,
    /// Detector modules feeding the receiver.
    pub modules: usize,
}

impl ScanGeometry {
    pub fn from_config(cfg: &ConfigReader) -> Result<Self> {
        let geometry = Self {
            fan_detectors: cfg.get("number_of_fan_detectors")?,
            projections: cfg.projections_per_frame()?,
            planes: cfg.get("number_of_planes")?,
            modules: cfg.get("number_of_det_modules")?,
        };
        if geometry.fan_detectors == 0
            || geometry.projections == 0
            || geometry.planes == 0
            || geometry.modules == 0
        {
            return Err(RisaError::Config(
                "scan geometry values must be non-zero".into(),
            ));
        }
        if geometry.fan_detectors % geometry.modules != 0 {
            return Err(RisaError::Config(format!(
                "number_of_fan_detectors ({}) must divide evenly across {} modules",
                geometry.fan_detectors, geometry.modules
            )));
        }
        tracing::debug!(?geometry, "scan geometry");
        Ok(geometry)
    }

    /// Detectors contributed by a single module per projection.
    pub fn detectors_per_module(&self) -> usize {
        self.fan_detectors / self.modules
    }

    /// Elements in one full sinogram frame.
    pub fn sinogram_elements(&self) -> usize {
        self.fan_detectors * self.projections
    }

    /// Elements one module contributes to a frame.
    pub fn module_elements(&self) -> usize {
        self.detectors_per_module() * self.projections
    }

    /// Plane a frame index belongs to.
    pub fn plane_of(&self, index: u64) -> u32 {
        (index % self.planes as u64) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConfigReader {
        ConfigReader::from_str(
            r#"{
                "number_of_fan_detectors": 768,
                "number_of_det_modules": 48,
                "number_of_planes": 2,
                "sampling_rate": 1,
                "scan_rate": 1000
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn derived_sizes() {
        let g = ScanGeometry::from_config(&config()).unwrap();
        assert_eq!(g.projections, 1000);
        assert_eq!(g.detectors_per_module(), 16);
        assert_eq!(g.sinogram_elements(), 768_000);
        assert_eq!(g.module_elements(), 16_000);
        assert_eq!(g.plane_of(5), 1);
        assert_eq!(g.plane_of(4), 0);
    }

    #[test]
    fn rejects_uneven_module_split() {
        let cfg = ConfigReader::from_str(
            r#"{
                "number_of_fan_detectors": 767,
                "number_of_det_modules": 48,
                "number_of_planes": 2,
                "sampling_rate": 1,
                "scan_rate": 1000
            }"#,
        )
        .unwrap();
        assert!(ScanGeometry::from_config(&cfg).is_err());
    }
}
