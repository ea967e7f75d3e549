//! Model artifact management
//!
//! Locates, validates, and downloads the detection model, recognition model,
//! and character dictionary the pipeline needs.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::config::ModelPaths;

/// Environment switch that forbids network downloads
pub const OFFLINE_ENV: &str = "TEXTSIGHT_OFFLINE";

/// Artifact identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Text detection model
    Detection,
    /// Text recognition model
    Recognition,
    /// Character dictionary for recognition
    Dictionary,
}

impl ModelType {
    pub const ALL: [ModelType; 3] = [
        ModelType::Detection,
        ModelType::Recognition,
        ModelType::Dictionary,
    ];

    /// File name inside the models directory
    pub fn filename(&self) -> &'static str {
        match self {
            ModelType::Detection => "det.onnx",
            ModelType::Recognition => "rec.onnx",
            ModelType::Dictionary => "dict.txt",
        }
    }

    /// Where to fetch the artifact from
    pub fn download_url(&self) -> &'static str {
        match self {
            ModelType::Detection => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/detection/v3/det.onnx"
            }
            ModelType::Recognition => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/rec.onnx"
            }
            ModelType::Dictionary => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/dict.txt"
            }
        }
    }

    /// Plausible file size range in bytes
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelType::Detection => (1_000_000, 200_000_000),
            ModelType::Recognition => (1_000_000, 200_000_000),
            ModelType::Dictionary => (2, 2_000_000),
        }
    }

    /// Display name for logs
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::Detection => "Text Detection",
            ModelType::Recognition => "Text Recognition",
            ModelType::Dictionary => "Character Dictionary",
        }
    }
}

/// Record of downloaded artifacts, stored as `manifest.json`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Unix seconds
    pub downloaded_at: u64,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Paths of the three artifacts a pipeline is built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModels {
    pub detection: PathBuf,
    pub recognition: PathBuf,
    pub dictionary: PathBuf,
}

/// Locates and caches model artifacts in one directory
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    /// Manager over `<data dir>/models`
    pub fn new() -> Result<Self> {
        let models_dir = crate::storage::get_data_dir()?.join("models");
        Self::with_dir(models_dir)
    }

    /// Manager over a custom directory, created if missing
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;
        Ok(Self { models_dir })
    }

    /// Manager for the directory named in `paths`, or the default one
    pub fn from_paths(paths: &ModelPaths) -> Result<Self> {
        match &paths.models_dir {
            Some(dir) => Self::with_dir(dir.clone()),
            None => Self::new(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        self.models_dir.join(model_type.filename())
    }

    /// Whether the artifact exists with a plausible size
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        match std::fs::metadata(self.model_path(model_type)) {
            Ok(metadata) if metadata.is_file() => {
                let (min, max) = model_type.expected_size_range();
                (min..=max).contains(&metadata.len())
            }
            _ => false,
        }
    }

    pub fn are_models_ready(&self) -> bool {
        ModelType::ALL.iter().all(|&m| self.is_model_available(m))
    }

    /// Availability and on-disk size of every artifact
    pub fn get_model_status(&self) -> Vec<(ModelType, bool, Option<u64>)> {
        ModelType::ALL
            .iter()
            .map(|&model_type| {
                let size = std::fs::metadata(self.model_path(model_type))
                    .ok()
                    .map(|m| m.len());
                (model_type, self.is_model_available(model_type), size)
            })
            .collect()
    }

    /// Path to an artifact, downloading it first if needed
    pub fn ensure_model(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.model_path(model_type);

        if self.is_model_available(model_type) {
            debug!("Model {:?} already available at {:?}", model_type, path);
            return Ok(path);
        }

        self.download_model(model_type)?;
        Ok(path)
    }

    /// Resolve artifact paths; explicit paths in `paths` win over the models directory
    ///
    /// With `fetch` set, artifacts not given explicitly are downloaded when
    /// missing. Otherwise a missing artifact is an error naming the files.
    pub fn resolve(&self, paths: &ModelPaths, fetch: bool) -> Result<ResolvedModels> {
        if !fetch && !self.are_models_ready() {
            let missing: Vec<&str> = self
                .get_model_status()
                .into_iter()
                .filter(|(model_type, available, _)| {
                    !available && explicit_path(paths, *model_type).is_none()
                })
                .map(|(model_type, _, _)| model_type.filename())
                .collect();
            if !missing.is_empty() {
                anyhow::bail!(
                    "Missing {} in {:?}; run with --fetch-models or pass explicit model paths",
                    missing.join(", "),
                    self.models_dir
                );
            }
        }

        let pick = |model_type: ModelType| -> Result<PathBuf> {
            match explicit_path(paths, model_type) {
                Some(path) => Ok(path.clone()),
                None if fetch => self.ensure_model(model_type),
                None => Ok(self.model_path(model_type)),
            }
        };

        Ok(ResolvedModels {
            detection: pick(ModelType::Detection)?,
            recognition: pick(ModelType::Recognition)?,
            dictionary: pick(ModelType::Dictionary)?,
        })
    }

    /// Download one artifact (blocking)
    pub fn download_model(&self, model_type: ModelType) -> Result<()> {
        let url = model_type.download_url();
        let path = self.model_path(model_type);

        if std::env::var_os(OFFLINE_ENV).is_some() {
            anyhow::bail!(
                "Offline mode: cannot download {}. Download it from {} and place it at {:?}",
                model_type.display_name(),
                url,
                path
            );
        }

        info!("Downloading {} from {}", model_type.display_name(), url);

        let rt = Runtime::new().context("Failed to create tokio runtime")?;
        let sha256 = rt.block_on(download_file(url, &path))?;

        if !self.is_model_available(model_type) {
            anyhow::bail!(
                "Downloaded {} failed size verification",
                model_type.display_name()
            );
        }

        self.record_download(model_type, sha256)?;

        info!("Downloaded {}", model_type.display_name());
        Ok(())
    }

    fn record_download(&self, model_type: ModelType, sha256: String) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_default();
        let size_bytes = std::fs::metadata(self.model_path(model_type))?.len();

        let info = ModelInfo {
            model_type: format!("{:?}", model_type),
            filename: model_type.filename().to_string(),
            size_bytes,
            sha256,
            downloaded_at: unix_now(),
        };

        match manifest.models.iter_mut().find(|m| m.filename == info.filename) {
            Some(existing) => *existing = info,
            None => manifest.models.push(info),
        }

        self.save_manifest(&manifest)
    }

    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if !manifest_path.exists() {
            return Ok(ModelManifest::default());
        }

        let content = std::fs::read_to_string(&manifest_path)?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", manifest_path))
    }

    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(self.models_dir.join("manifest.json"), content)?;
        Ok(())
    }
}

/// Location configured for one artifact, if any
fn explicit_path(paths: &ModelPaths, model_type: ModelType) -> Option<&PathBuf> {
    match model_type {
        ModelType::Detection => paths.detection.as_ref(),
        ModelType::Recognition => paths.recognition.as_ref(),
        ModelType::Dictionary => paths.dictionary.as_ref(),
    }
}

/// Stream `url` to `path` through a temp file; returns the hex SHA-256
async fn download_file(url: &str, path: &Path) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to send download request")?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    let total_size = response.content_length();
    debug!("Download size: {:?} bytes", total_size);

    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;
        file.write_all(&chunk).context("Failed to write to temp file")?;
        hasher.update(&chunk);
        downloaded += chunk.len() as u64;
    }

    file.flush().context("Failed to flush temp file")?;
    drop(file);
    debug!("Received {} bytes", downloaded);

    std::fs::rename(&temp_path, path)
        .context("Failed to move downloaded file to final location")?;

    Ok(format!("{:x}", hasher.finalize()))
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
