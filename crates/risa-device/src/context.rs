use risa_core::{ConfigReader, Result, RisaError};

/// Ordinal of a compute accelerator.
pub type DeviceId = u32;

/// Registry of the accelerators available to the pipeline.
///
/// Every stage spawns one worker per registered device; the registry is
/// probed once at startup and fixed for the process lifetime.
#[derive(Debug, Clone, Copy)]
pub struct DeviceRegistry {
    count: usize,
}

impl DeviceRegistry {
    /// Probe the accelerators configured for this run.
    ///
    /// Zero accelerators is a startup error: the pipeline cannot run
    /// without at least one device to fan work out to.
    pub fn probe(cfg: &ConfigReader) -> Result<Self> {
        let count: usize = cfg.get_or("number_of_devices", 1)?;
        if count == 0 {
            return Err(RisaError::Device("no accelerators available".into()));
        }
        tracing::info!(devices = count, "accelerator registry initialised");
        Ok(Self { count })
    }

    /// Registry with a fixed device count, for tests and tools.
    pub fn with_count(count: usize) -> Result<Self> {
        if count == 0 {
            return Err(RisaError::Device("no accelerators available".into()));
        }
        Ok(Self { count })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn devices(&self) -> impl Iterator<Item = DeviceId> {
        0..self.count as DeviceId
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_devices_is_a_startup_error() {
        let cfg = ConfigReader::from_str(r#"{"number_of_devices": 0}"#).unwrap();
        assert!(DeviceRegistry::probe(&cfg).is_err());
    }

    #[test]
    fn defaults_to_one_device() {
        let cfg = ConfigReader::from_str("{}").unwrap();
        let reg = DeviceRegistry::probe(&cfg).unwrap();
        assert_eq!(reg.count(), 1);
        assert_eq!(reg.devices().collect::<Vec<_>>(), vec![0]);
    }
}
