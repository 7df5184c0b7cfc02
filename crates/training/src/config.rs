use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use crate::distributed::NOT_DISTRIBUTED;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            runtime: RuntimeConfig::default(),
            checkpoint: CheckpointConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TrainingError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut config: TrainingConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(TrainingError::ConfigFormat(format!(
                    "unsupported configuration extension '{}'",
                    other
                )));
            }
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.apply_base_path(base_dir);
        config.validate()?;

        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TrainingError> {
        Self::from_path(path)
    }

    pub fn validate(&self) -> Result<(), TrainingError> {
        let mut errors = Vec::new();

        if self.data.dataset.trim().is_empty() {
            errors.push("data.dataset must not be empty".to_string());
        }

        if let Some(cache) = &self.data.dataset_cache {
            if cache.as_os_str().is_empty() {
                errors.push("data.dataset_cache must not be empty when set".to_string());
            }
        }

        if self.runtime.local_rank < NOT_DISTRIBUTED {
            errors.push(format!(
                "runtime.local_rank must be {} or a non-negative rank",
                NOT_DISTRIBUTED
            ));
        }

        if self.runtime.max_epochs == 0 {
            errors.push("runtime.max_epochs must be greater than 0".to_string());
        }

        if self.checkpoint.prefix.trim().is_empty() {
            errors.push("checkpoint.prefix must not be empty".to_string());
        }

        if self.checkpoint.save_interval == 0 {
            errors.push("checkpoint.save_interval must be greater than 0".to_string());
        }

        if self.checkpoint.n_saved == 0 {
            errors.push("checkpoint.n_saved must be greater than 0".to_string());
        }

        if !(0.0 < self.logging.running_average_alpha && self.logging.running_average_alpha < 1.0)
        {
            errors.push("logging.running_average_alpha must be in (0, 1)".to_string());
        }

        if self.logging.tensorboard_flush_every_n == 0 {
            errors.push("logging.tensorboard_flush_every_n must be greater than 0".to_string());
        }

        if !errors.is_empty() {
            return Err(TrainingError::validation(errors));
        }

        Ok(())
    }

    pub fn is_distributed(&self) -> bool {
        self.runtime.local_rank != NOT_DISTRIBUTED
    }

    fn apply_base_path(&mut self, base: &Path) {
        self.data.apply_base_path(base);
        self.runtime.apply_base_path(base);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_dataset")]
    pub dataset: String,
    #[serde(default)]
    pub dataset_cache: Option<PathBuf>,
    #[serde(default)]
    pub with_labels: bool,
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dataset: default_dataset(),
            dataset_cache: None,
            with_labels: false,
            download_dir: None,
        }
    }
}

impl DataConfig {
    fn apply_base_path(&mut self, base: &Path) {
        for path in [self.dataset_cache.as_mut(), self.download_dir.as_mut()] {
            if let Some(path) = path {
                absolutize_in_place(path, base);
            }
        }
    }

    pub fn request(&self) -> pretraining_data::DatasetRequest {
        pretraining_data::DatasetRequest {
            dataset: self.dataset.clone(),
            dataset_cache: self.dataset_cache.clone(),
            with_labels: self.with_labels,
        }
    }

    pub fn downloads(&self) -> pretraining_data::DownloadCache {
        match &self.download_dir {
            Some(dir) => pretraining_data::DownloadCache::new(dir.clone()),
            None => pretraining_data::DownloadCache::from_env(),
        }
    }

    /// Encodes the configured dataset, or loads it from `dataset_cache`.
    pub fn prepare_dataset<T>(
        &self,
        tokenizer: &T,
    ) -> Result<pretraining_data::EncodedDataset, TrainingError>
    where
        T: pretraining_data::SubwordTokenizer + ?Sized,
    {
        let request = self.request();
        let dataset =
            pretraining_data::get_and_tokenize_dataset(tokenizer, &request, &self.downloads())?;
        Ok(dataset)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default = "default_local_rank")]
    pub local_rank: i32,
    #[serde(default = "default_max_epochs")]
    pub max_epochs: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            local_rank: default_local_rank(),
            max_epochs: default_max_epochs(),
        }
    }
}

impl RuntimeConfig {
    fn apply_base_path(&mut self, base: &Path) {
        if let Some(dir) = self.log_dir.as_mut() {
            absolutize_in_place(dir, base);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_prefix")]
    pub prefix: String,
    #[serde(default = "default_save_interval")]
    pub save_interval: usize,
    #[serde(default = "default_n_saved")]
    pub n_saved: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            prefix: default_checkpoint_prefix(),
            save_interval: default_save_interval(),
            n_saved: default_n_saved(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_running_average_alpha")]
    pub running_average_alpha: f64,
    #[serde(default = "default_true")]
    pub progress_persist: bool,
    #[serde(default = "default_flush_every_n")]
    pub tensorboard_flush_every_n: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            running_average_alpha: default_running_average_alpha(),
            progress_persist: true,
            tensorboard_flush_every_n: default_flush_every_n(),
        }
    }
}

fn absolutize_in_place(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

fn default_dataset() -> String {
    pretraining_data::pipeline::DEFAULT_DATASET.to_string()
}

fn default_local_rank() -> i32 {
    NOT_DISTRIBUTED
}

fn default_max_epochs() -> usize {
    1
}

fn default_checkpoint_prefix() -> String {
    "checkpoint".to_string()
}

fn default_save_interval() -> usize {
    1
}

fn default_n_saved() -> usize {
    3
}

fn default_running_average_alpha() -> f64 {
    0.98
}

fn default_true() -> bool {
    true
}

fn default_flush_every_n() -> usize {
    1
}

#[derive(Debug)]
pub enum TrainingError {
    Io(std::io::Error),
    ConfigFormat(String),
    Validation(Vec<String>),
    Initialization(String),
    Runtime(String),
    Data(pretraining_data::Error),
    Serialization(String),
}

impl TrainingError {
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    pub fn validation(messages: Vec<String>) -> Self {
        Self::Validation(messages)
    }
}

impl fmt::Display for TrainingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingError::Io(err) => write!(f, "I/O failure: {}", err),
            TrainingError::ConfigFormat(err) => write!(f, "failed to parse config: {}", err),
            TrainingError::Validation(messages) => {
                write!(f, "invalid configuration: {}", messages.join("; "))
            }
            TrainingError::Initialization(msg) => {
                write!(f, "instrumentation setup failed: {}", msg)
            }
            TrainingError::Runtime(msg) => write!(f, "training failed: {}", msg),
            TrainingError::Data(err) => write!(f, "dataset preparation failed: {}", err),
            TrainingError::Serialization(msg) => write!(f, "serialization failed: {}", msg),
        }
    }
}

impl std::error::Error for TrainingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrainingError::Io(err) => Some(err),
            TrainingError::Data(err) => Some(err),
            TrainingError::ConfigFormat(_) | TrainingError::Validation(_) => None,
            TrainingError::Initialization(_)
            | TrainingError::Runtime(_)
            | TrainingError::Serialization(_) => None,
        }
    }
}

impl From<std::io::Error> for TrainingError {
    fn from(value: std::io::Error) -> Self {
        TrainingError::Io(value)
    }
}

impl From<toml::de::Error> for TrainingError {
    fn from(value: toml::de::Error) -> Self {
        TrainingError::ConfigFormat(value.to_string())
    }
}

impl From<serde_json::Error> for TrainingError {
    fn from(value: serde_json::Error) -> Self {
        TrainingError::ConfigFormat(value.to_string())
    }
}

impl From<bincode::Error> for TrainingError {
    fn from(value: bincode::Error) -> Self {
        TrainingError::Serialization(value.to_string())
    }
}

impl From<pretraining_data::Error> for TrainingError {
    fn from(value: pretraining_data::Error) -> Self {
        TrainingError::Data(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_run() {
        let config = TrainingConfig::default();
        assert_eq!(config.data.dataset, "wikitext-103");
        assert_eq!(config.runtime.local_rank, -1);
        assert_eq!(config.checkpoint.n_saved, 3);
        assert_eq!(config.checkpoint.save_interval, 1);
        assert!(config.logging.progress_persist);
        assert!(!config.is_distributed());
        config.validate().unwrap();
    }

    #[test]
    fn loads_toml_and_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(
            &path,
            r#"
[data]
dataset = "imdb"
dataset_cache = "cache/imdb.bin"
with_labels = true

[runtime]
log_dir = "runs/imdb"
local_rank = 0
max_epochs = 4

[checkpoint]
n_saved = 2
"#,
        )
        .unwrap();

        let config = TrainingConfig::load(&path).unwrap();
        assert_eq!(config.data.dataset, "imdb");
        assert!(config.data.with_labels);
        assert_eq!(
            config.data.dataset_cache.as_deref(),
            Some(dir.path().join("cache/imdb.bin").as_path())
        );
        assert_eq!(config.runtime.log_dir, Some(dir.path().join("runs/imdb")));
        assert!(config.is_distributed());
        assert_eq!(config.checkpoint.n_saved, 2);
        assert_eq!(config.checkpoint.prefix, "checkpoint");

        let request = config.data.request();
        assert_eq!(request.dataset, "imdb");
        assert!(request.with_labels);
    }

    #[test]
    fn validation_collects_every_problem() {
        let mut config = TrainingConfig::default();
        config.runtime.local_rank = -3;
        config.runtime.max_epochs = 0;
        config.checkpoint.n_saved = 0;
        config.logging.running_average_alpha = 1.5;

        match config.validate() {
            Err(TrainingError::Validation(messages)) => assert_eq!(messages.len(), 4),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    struct SpaceSplit;

    impl pretraining_data::SubwordTokenizer for SpaceSplit {
        fn tokenize(&self, text: &str) -> pretraining_data::Result<Vec<String>> {
            Ok(text.split_whitespace().map(str::to_string).collect())
        }

        fn convert_tokens_to_ids(&self, tokens: &[String]) -> pretraining_data::Result<Vec<u32>> {
            Ok(tokens.iter().map(|t| t.len() as u32).collect())
        }
    }

    #[test]
    fn prepare_dataset_encodes_and_caches_local_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("corpus");
        fs::create_dir(&corpus).unwrap();
        fs::write(corpus.join("train.txt"), "abc de\n").unwrap();
        fs::write(corpus.join("valid.txt"), "f\n").unwrap();

        let mut config = TrainingConfig::default();
        config.data.dataset = corpus.to_string_lossy().into_owned();
        config.data.dataset_cache = Some(dir.path().join("cache/encoded.bin"));
        config.data.download_dir = Some(dir.path().join("downloads"));

        let dataset = config.data.prepare_dataset(&SpaceSplit).unwrap();
        assert_eq!(dataset.ids(pretraining_data::Split::Train), Some(&[3, 2, 5][..]));
        assert_eq!(dataset.num_words(pretraining_data::Split::Valid), Some(1));
        assert!(dir.path().join("cache/encoded.bin").is_file());
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        fs::write(&path, "data: {}").unwrap();
        assert!(matches!(
            TrainingConfig::load(&path),
            Err(TrainingError::ConfigFormat(_))
        ));
    }
}
