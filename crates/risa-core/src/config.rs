use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Result, RisaError};

/// Keyed accessor over the JSON configuration document.
///
/// The document is read once at startup; every stage performs typed lookups
/// against it during construction. A missing key or a value of the wrong
/// type is a hard configuration error: the pipeline never starts with a
/// partially read configuration.
pub struct ConfigReader {
    root: Value,
}

impl ConfigReader {
    /// Load and parse the configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            RisaError::Config(format!("cannot read `{}`: {e}", path.display()))
        })?;
        let cfg = Self::from_str(&text)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(cfg)
    }

    /// Parse a configuration document from a string.
    pub fn from_str(text: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(text)
            .map_err(|e| RisaError::Config(format!("invalid JSON: {e}")))?;
        if !root.is_object() {
            return Err(RisaError::Config(
                "configuration root must be a JSON object".into(),
            ));
        }
        Ok(Self { root })
    }

    /// Typed lookup of a required top-level key.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .root
            .get(key)
            .ok_or_else(|| RisaError::Config(format!("missing key `{key}`")))?;
        let parsed: T = serde_json::from_value(value.clone())
            .map_err(|e| RisaError::Config(format!("key `{key}`: {e}")))?;
        tracing::trace!(key, value = %value, "config lookup");
        Ok(parsed)
    }

    /// Typed lookup of an optional key, falling back to `default`.
    ///
    /// A present key of the wrong type is still an error; only absence is
    /// defaulted.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        match self.root.get(key) {
            None => Ok(default),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| RisaError::Config(format!("key `{key}`: {e}"))),
        }
    }

    /// Resolve the path of an `inputs[]` entry by its `inputtype`.
    pub fn input_path(&self, input_type: &str) -> Result<PathBuf> {
        let list = self
            .root
            .get("inputs")
            .and_then(Value::as_array)
            .ok_or_else(|| RisaError::Config("missing `inputs` list".into()))?;
        for entry in list {
            if entry.get("inputtype").and_then(Value::as_str) == Some(input_type) {
                let path = entry
                    .get("inputpath")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        RisaError::Config(format!(
                            "inputs entry `{input_type}` has no `inputpath`"
                        ))
                    })?;
                return Ok(PathBuf::from(path));
            }
        }
        Err(RisaError::Config(format!(
            "no inputs entry with inputtype `{input_type}`"
        )))
    }

    /// Number of buffers the memory pool preallocates for `stage`.
    pub fn pool_size(&self, stage: &str) -> Result<usize> {
        self.get(&format!("mempoolsize_{stage}"))
    }

    /// Kernel launch tile size for `stage`; defaults to 16 when unset.
    pub fn block_size_2d(&self, stage: &str) -> Result<usize> {
        self.get_or(&format!("blocksize_2d_{stage}"), 16)
    }

    /// Projections per frame, derived from the sampling and scan rates.
    pub fn projections_per_frame(&self) -> Result<usize> {
        let sampling_rate: u64 = self.get("sampling_rate")?;
        let scan_rate: u64 = self.get("scan_rate")?;
        if scan_rate == 0 {
            return Err(RisaError::Config("scan_rate must be non-zero".into()));
        }
        Ok((sampling_rate * 1_000_000 / scan_rate) as usize)
    }
}
