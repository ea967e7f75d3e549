//! Pipeline Configuration
//!
//! Runtime, detection and recognition settings stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level pipeline settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// ONNX Runtime session settings, shared by both stages
    pub session: SessionSettings,
    /// Detection stage settings
    pub detection: DetectionSettings,
    /// Recognition stage settings
    pub recognition: RecognitionSettings,
    /// Explicit model artifact locations
    pub models: ModelPaths,
}

/// Graph optimization level applied when a model is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationLevel {
    Disable,
    Basic,
    Extended,
    #[default]
    All,
}

/// Channel order a model expects its input pixels in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Execution options for an inference session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Intra-operator worker threads (None = available hardware concurrency)
    pub intra_threads: Option<usize>,
    /// Inter-operator worker threads
    pub inter_threads: usize,
    /// Graph optimization level
    pub optimization_level: OptimizationLevel,
    /// Reuse memory allocation patterns across runs
    pub memory_pattern: bool,
    /// Run independent graph branches in parallel
    pub parallel_execution: bool,
    /// Use the CPU memory arena allocator
    pub cpu_arena: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            intra_threads: None,
            inter_threads: 1,
            optimization_level: OptimizationLevel::All,
            memory_pattern: true,
            parallel_execution: true,
            cpu_arena: true,
        }
    }
}

impl SessionSettings {
    /// Resolve the intra-op thread count
    pub fn effective_intra_threads(&self) -> usize {
        self.intra_threads
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1)
    }
}

/// Detection stage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Length the longer image side is scaled to
    pub max_side_len: u32,
    /// Both resized dimensions are floored to a multiple of this
    pub stride: u32,
    /// Probability at or above which a map pixel is text
    pub threshold: f32,
    /// Fraction of the box width added on each side
    pub horizontal_ratio: f32,
    /// Fraction of the box height added on each side
    pub vertical_ratio: f32,
    /// Channel order of the detection model input
    pub channel_order: ChannelOrder,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            max_side_len: 960,
            stride: 32,
            threshold: 0.3,
            horizontal_ratio: 0.2,
            vertical_ratio: 0.5,
            channel_order: ChannelOrder::Rgb,
        }
    }
}

/// Recognition stage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Height every region is resized to
    pub target_height: u32,
    /// Channel order of the recognition model input
    pub channel_order: ChannelOrder,
    /// Dictionary entries that never appear in output text
    pub placeholder_glyphs: Vec<String>,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            target_height: 48,
            channel_order: ChannelOrder::Rgb,
            placeholder_glyphs: vec!["■".to_string(), "<blank>".to_string()],
        }
    }
}

/// Optional explicit model locations; unset entries come from the model manager
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPaths {
    pub models_dir: Option<PathBuf>,
    pub detection: Option<PathBuf>,
    pub recognition: Option<PathBuf>,
    pub dictionary: Option<PathBuf>,
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let config: PipelineConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &PipelineConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
