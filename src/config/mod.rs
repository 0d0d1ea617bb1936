// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for Leafscan

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    /// Classifier model settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Where artifacts and the ledger live
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP server settings
    #[serde(default)]
    pub web: WebConfig,
}

/// Memory layout of the input tensor expected by the model
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// Batch, height, width, channels (Keras default)
    Nhwc,
    /// Batch, channels, height, width
    Nchw,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    /// Path to the exported ONNX classifier
    #[serde(default = "default_model_path")]
    pub path: PathBuf,
    /// Square input resolution in pixels
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_layout")]
    pub layout: TensorLayout,
    /// Apply softmax to raw model output (for models exporting logits)
    #[serde(default)]
    pub apply_softmax: bool,
    /// Per-call inference timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Concurrent inference slots; 1 serializes all calls
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Running plus queued calls admitted before new ones are rejected
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_images_dir")]
    pub images_dir: PathBuf,
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
    /// Allowed CORS origins; empty allows any origin
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

// Default value functions
fn default_model_path() -> PathBuf { PathBuf::from("plant_disease_classifier.onnx") }
fn default_input_size() -> u32 { 224 }
fn default_layout() -> TensorLayout { TensorLayout::Nhwc }
fn default_timeout_ms() -> u64 { 10_000 }
fn default_max_concurrent() -> usize { 1 }
fn default_max_pending() -> usize { 32 }
fn default_images_dir() -> PathBuf { PathBuf::from("saved_images") }
fn default_reports_dir() -> PathBuf { PathBuf::from("reports") }
fn default_history_path() -> PathBuf { PathBuf::from("prediction_history.jsonl") }
fn default_web_host() -> String { "127.0.0.1".to_string() }
fn default_web_port() -> u16 { 8000 }
fn default_max_upload_bytes() -> usize { 10 * 1024 * 1024 }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            input_size: default_input_size(),
            layout: default_layout(),
            apply_softmax: false,
            timeout_ms: default_timeout_ms(),
            max_concurrent: default_max_concurrent(),
            max_pending: default_max_pending(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            images_dir: default_images_dir(),
            reports_dir: default_reports_dir(),
            history_path: default_history_path(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
            allowed_origins: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::LeafscanError::Config(format!("Failed to parse config: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.model.input_size == 0 {
            return Err(crate::LeafscanError::Config("model.input_size must be positive".into()));
        }
        if self.model.max_concurrent == 0 {
            return Err(crate::LeafscanError::Config("model.max_concurrent must be at least 1".into()));
        }
        if self.model.max_pending < self.model.max_concurrent {
            return Err(crate::LeafscanError::Config(
                "model.max_pending must be at least model.max_concurrent".into(),
            ));
        }
        if self.model.timeout_ms == 0 {
            return Err(crate::LeafscanError::Config("model.timeout_ms must be positive".into()));
        }
        Ok(())
    }
}
