//! Configuration resolution for the triage pipeline
//!
//! Resolution priority: environment variables (`RADAID_*`) override TOML,
//! TOML overrides built-in defaults. Every field has a safe default so the
//! pipeline runs without any configuration present.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Triage pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    /// Modality tags accepted by the intake gateway
    pub approved_modalities: Vec<String>,
    /// Minimum slice count for volumetric (CT/MR) analysis
    pub min_volume_slices: usize,
    /// CT window preset applied when no hint is available.
    /// Whether soft_tissue is clinically appropriate for unlabeled body
    /// parts is an open question upstream; kept configurable here.
    pub default_ct_window: String,
    /// Target depth D of reconstructed volumes
    pub target_depth: usize,
    /// Target height/width S of slices and volumes
    pub target_size: usize,
    /// Lower clipping percentile for MRI normalization
    pub mri_lower_percentile: f32,
    /// Upper clipping percentile for MRI normalization
    pub mri_upper_percentile: f32,
    /// Positive-finding probability threshold for volumetric inference
    pub positive_threshold: f32,
    /// Positive-finding probability threshold for planar (X-ray) inference
    pub planar_positive_threshold: f32,
    /// Ranked predictions retained per inference output
    pub top_k: usize,
    /// Per-stage wall clock limit for volume construction and inference.
    /// None disables the timeout.
    pub stage_timeout_secs: Option<u64>,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            approved_modalities: vec![
                "CR".to_string(),
                "DX".to_string(),
                "CT".to_string(),
                "MR".to_string(),
            ],
            min_volume_slices: 5,
            default_ct_window: "soft_tissue".to_string(),
            target_depth: 64,
            target_size: 224,
            mri_lower_percentile: 1.0,
            mri_upper_percentile: 99.0,
            positive_threshold: 0.5,
            planar_positive_threshold: 0.65,
            top_k: 5,
            stage_timeout_secs: None,
        }
    }
}

impl TriageConfig {
    /// Load configuration from a TOML file, then apply env overrides.
    ///
    /// A missing file is not an error; defaults are used and a note logged.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
            let parsed: TriageConfig = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
            info!("Configuration loaded from {:?}", path);
            parsed
        } else {
            info!("No config file at {:?}, using defaults", path);
            TriageConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `RADAID_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<usize>("RADAID_MIN_VOLUME_SLICES") {
            self.min_volume_slices = v;
        }
        if let Some(v) = env_parse::<usize>("RADAID_TARGET_DEPTH") {
            self.target_depth = v;
        }
        if let Some(v) = env_parse::<usize>("RADAID_TARGET_SIZE") {
            self.target_size = v;
        }
        if let Some(v) = env_parse::<f32>("RADAID_POSITIVE_THRESHOLD") {
            self.positive_threshold = v;
        }
        if let Some(v) = env_parse::<u64>("RADAID_STAGE_TIMEOUT_SECS") {
            self.stage_timeout_secs = Some(v);
        }
        if let Ok(v) = std::env::var("RADAID_DEFAULT_CT_WINDOW") {
            if !v.trim().is_empty() {
                self.default_ct_window = v;
            }
        }
        if let Ok(v) = std::env::var("RADAID_APPROVED_MODALITIES") {
            let list: Vec<String> = v
                .split(',')
                .map(|s| s.trim().to_ascii_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !list.is_empty() {
                self.approved_modalities = list;
            }
        }
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.target_depth == 0 || self.target_size == 0 {
            return Err(Error::Config(
                "target_depth and target_size must be non-zero".to_string(),
            ));
        }
        if self.min_volume_slices == 0 {
            return Err(Error::Config(
                "min_volume_slices must be at least 1".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.mri_lower_percentile)
            || !(0.0..=100.0).contains(&self.mri_upper_percentile)
            || self.mri_lower_percentile >= self.mri_upper_percentile
        {
            return Err(Error::Config(format!(
                "invalid MRI percentiles: ({}, {})",
                self.mri_lower_percentile, self.mri_upper_percentile
            )));
        }
        if self.approved_modalities.is_empty() {
            return Err(Error::Config(
                "approved_modalities must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// True if the given modality tag text is on the allow-list
    pub fn is_approved_modality(&self, tag: &str) -> bool {
        let tag = tag.trim().to_ascii_uppercase();
        self.approved_modalities
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&tag))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring unparseable {}={:?}", key, raw);
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = TriageConfig::default();
        assert_eq!(config.min_volume_slices, 5);
        assert_eq!(config.target_depth, 64);
        assert_eq!(config.target_size, 224);
        assert_eq!(config.default_ct_window, "soft_tissue");
        assert_eq!(config.approved_modalities, vec!["CR", "DX", "CT", "MR"]);
        assert!(config.stage_timeout_secs.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_approved_modality_check() {
        let config = TriageConfig::default();
        assert!(config.is_approved_modality("CT"));
        assert!(config.is_approved_modality("cr"));
        assert!(!config.is_approved_modality("US"));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = TriageConfig::load(Path::new("/nonexistent/radaid.toml")).unwrap();
        assert_eq!(config.min_volume_slices, 5);
    }

    #[test]
    fn test_load_toml_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "min_volume_slices = 8\ndefault_ct_window = \"lung\"\ntarget_depth = 32"
        )
        .unwrap();

        let config = TriageConfig::load(file.path()).unwrap();
        assert_eq!(config.min_volume_slices, 8);
        assert_eq!(config.default_ct_window, "lung");
        assert_eq!(config.target_depth, 32);
        // Untouched fields keep defaults
        assert_eq!(config.target_size, 224);
    }

    #[test]
    fn test_validate_rejects_zero_dims() {
        let mut config = TriageConfig::default();
        config.target_depth = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_percentiles() {
        let mut config = TriageConfig::default();
        config.mri_lower_percentile = 99.0;
        config.mri_upper_percentile = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_allow_list() {
        let mut config = TriageConfig::default();
        config.approved_modalities.clear();
        assert!(config.validate().is_err());
    }
}
