use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::faces::DetectionParams;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub detection: DetectionParams,

    #[serde(default)]
    pub models: ModelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Directory model files are loaded from (and downloaded into).
    #[serde(default = "default_models_dir")]
    pub dir: PathBuf,

    /// ONNX Runtime intra-op threads per session.
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,

    #[serde(default = "default_pnet")]
    pub pnet: NetConfig,

    #[serde(default = "default_rnet")]
    pub rnet: NetConfig,

    #[serde(default = "default_onet")]
    pub onet: NetConfig,
}

/// One cascade network and the tensor names of its ONNX graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetConfig {
    pub file: String,

    /// Download location used when `file` is missing from the models directory.
    #[serde(default)]
    pub url: Option<String>,

    pub input: String,

    pub confidence: String,

    pub regression: String,

    #[serde(default)]
    pub landmarks: Option<String>,

    /// Square crop side for the refine and output networks; ignored for the proposal network.
    #[serde(default)]
    pub input_size: u32,
}

fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("facecascade")
        .join("models")
}

fn default_intra_threads() -> usize {
    4
}

fn default_pnet() -> NetConfig {
    NetConfig {
        file: "det1.onnx".to_string(),
        url: None,
        input: "data".to_string(),
        confidence: "prob1".to_string(),
        regression: "conv4-2".to_string(),
        landmarks: None,
        input_size: 0,
    }
}

fn default_rnet() -> NetConfig {
    NetConfig {
        file: "det2.onnx".to_string(),
        url: None,
        input: "data".to_string(),
        confidence: "prob1".to_string(),
        regression: "conv5-2".to_string(),
        landmarks: None,
        input_size: 24,
    }
}

fn default_onet() -> NetConfig {
    NetConfig {
        file: "det3.onnx".to_string(),
        url: None,
        input: "data".to_string(),
        confidence: "prob1".to_string(),
        regression: "conv6-2".to_string(),
        landmarks: Some("conv6-3".to_string()),
        input_size: 48,
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: default_models_dir(),
            intra_threads: default_intra_threads(),
            pnet: default_pnet(),
            rnet: default_rnet(),
            onet: default_onet(),
        }
    }
}

impl Config {
    /// Load from the default location, writing a default config if none exists.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.detection.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("facecascade")
    }

    fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}
