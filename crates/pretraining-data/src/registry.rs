//! Built-in dataset registry and identifier resolution.
//!
//! A dataset identifier is either one of the registered names below, which
//! map to hosted text files, or a directory expected to contain `train.txt`
//! and `valid.txt`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const PRETRAINED_MODEL_URL: &str =
    "https://s3.amazonaws.com/models.huggingface.co/naacl-2019-tutorial/";
pub const WEIGHTS_NAME: &str = "model_checkpoint.pth";
pub const CONFIG_NAME: &str = "model_training_args.bin";

const DATASETS_BASE_URL: &str = "https://s3.amazonaws.com/datasets.huggingface.co";

/// Named partition of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Valid,
}

impl Split {
    pub const ALL: [Split; 2] = [Split::Train, Split::Valid];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a split's text lives before acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Remote(String),
    Local(PathBuf),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Remote(url) => f.write_str(url),
            Location::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LabelSource {
    pub train: Location,
    pub valid: Location,
    pub convert: BTreeMap<String, i64>,
}

impl LabelSource {
    pub fn location(&self, split: Split) -> &Location {
        match split {
            Split::Train => &self.train,
            Split::Valid => &self.valid,
        }
    }
}

/// Resolved per-split resources of a dataset.
#[derive(Debug, Clone)]
pub struct DatasetSource {
    pub name: String,
    pub train: Location,
    pub valid: Location,
    pub labels: Option<LabelSource>,
}

impl DatasetSource {
    pub fn location(&self, split: Split) -> &Location {
        match split {
            Split::Train => &self.train,
            Split::Valid => &self.valid,
        }
    }

    /// Source reading `train.txt` and `valid.txt` from a local directory.
    pub fn from_directory(dir: &Path) -> Self {
        Self {
            name: dir.display().to_string(),
            train: Location::Local(dir.join("train.txt")),
            valid: Location::Local(dir.join("valid.txt")),
            labels: None,
        }
    }
}

/// Names known to the registry, in registration order.
pub const REGISTERED_DATASETS: [&str; 5] = [
    "wikitext-2",
    "wikitext-103",
    "simplebooks-2-raw",
    "simplebooks-92-raw",
    "imdb",
];

/// Looks up a registered dataset by name.
pub fn lookup(name: &str) -> Option<DatasetSource> {
    let remote = |file: &str| Location::Remote(format!("{DATASETS_BASE_URL}/{file}"));
    let source = |train: &str, valid: &str| DatasetSource {
        name: name.to_string(),
        train: remote(train),
        valid: remote(valid),
        labels: None,
    };

    match name {
        "wikitext-2" => Some(source("wikitext-2/train.txt", "wikitext-2/valid.txt")),
        "wikitext-103" => Some(source(
            "wikitext-103/wiki.train.tokens",
            "wikitext-103/wiki.valid.tokens",
        )),
        "simplebooks-2-raw" => Some(source(
            "simplebooks-2-raw/train.txt",
            "simplebooks-2-raw/valid.txt",
        )),
        "simplebooks-92-raw" => Some(source(
            "simplebooks-92-raw/train.txt",
            "simplebooks-92-raw/valid.txt",
        )),
        "imdb" => {
            let mut imdb = source("aclImdb/train.txt", "aclImdb/valid.txt");
            let convert = BTreeMap::from([("pos".to_string(), 0), ("neg".to_string(), 1)]);
            imdb.labels = Some(LabelSource {
                train: remote("aclImdb/train.labels.txt"),
                valid: remote("aclImdb/valid.labels.txt"),
                convert,
            });
            Some(imdb)
        }
        _ => None,
    }
}

/// Maps an identifier to concrete resources: registry names first, then a
/// local directory. The directory is not checked here; a missing split file
/// surfaces when it is opened.
pub fn resolve_dataset(identifier: &str) -> DatasetSource {
    lookup(identifier).unwrap_or_else(|| DatasetSource::from_directory(Path::new(identifier)))
}

/// Location of a file published alongside the pretrained model.
pub fn pretrained_artifact(name: &str) -> Location {
    Location::Remote(format!("{PRETRAINED_MODEL_URL}{name}"))
}
