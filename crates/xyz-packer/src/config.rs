//! Job configuration: TOML file values with CLI overrides layered on top.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Knobs that shape the hierarchical layout. Passed explicitly to the batch
/// assembler and the hierarchical writer.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutConfig {
    /// Structures per `config_batch_{k}` group.
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,
    /// `config_type` written when a structure has no `config_type` metadata.
    #[serde(default = "defaults::config_type")]
    pub config_type: String,
    /// `weight` written when a structure has no `config_weight` metadata.
    #[serde(default = "defaults::weight")]
    pub weight: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::batch_size(),
            config_type: defaults::config_type(),
            weight: defaults::weight(),
        }
    }
}

impl LayoutConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be > 0");
        }
        if !self.weight.is_finite() {
            bail!("weight must be finite (got {})", self.weight);
        }
        Ok(())
    }
}

/// Contents of an optional `--config` TOML file.
///
/// ```toml
/// input = "training_set.xyz"
/// output = "train.npt"
/// mirror = "train.sqlite"
///
/// [layout]
/// batch_size = 50
/// config_type = "DFT"
/// weight = 1.0
/// ```
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackConfig {
    #[serde(default)]
    pub input: Option<PathBuf>,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub mirror: Option<PathBuf>,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub parallel_sinks: bool,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub layout: LayoutConfig,
}

impl PackConfig {
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(contents)?;
        Ok(cfg)
    }
}

mod defaults {
    pub fn batch_size() -> usize { 50 }
    pub fn config_type() -> String { "DFT".to_string() }
    pub fn weight() -> f64 { 1.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = PackConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.layout, LayoutConfig::default());
        assert_eq!(cfg.layout.batch_size, 50);
        assert_eq!(cfg.layout.config_type, "DFT");
        assert_eq!(cfg.layout.weight, 1.0);
        assert!(!cfg.parallel_sinks);
        assert!(cfg.mirror.is_none());
    }

    #[test]
    fn partial_layout_keeps_remaining_defaults() {
        let cfg = PackConfig::from_toml_str(
            r#"
            input = "set.xyz"
            output = "set.npt"
            [layout]
            batch_size = 8
            "#,
        )
        .unwrap();
        assert_eq!(cfg.input.as_deref(), Some(Path::new("set.xyz")));
        assert_eq!(cfg.layout.batch_size, 8);
        assert_eq!(cfg.layout.config_type, "DFT");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(PackConfig::from_toml_str("batchsize = 3").is_err());
    }

    #[test]
    fn validation_rejects_zero_batch() {
        let layout = LayoutConfig {
            batch_size: 0,
            ..LayoutConfig::default()
        };
        assert!(layout.validate().is_err());
        assert!(LayoutConfig::default().validate().is_ok());
    }
}
