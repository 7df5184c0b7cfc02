use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("encoded dataset cache error: {0}")]
    Cache(#[from] bincode::Error),

    #[error("serde_json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("label '{label}' in split '{split}' is not in the conversion table")]
    UnknownLabel { label: String, split: String },

    #[error("dataset '{0}' has no label resources")]
    MissingLabels(String),

    #[error("cannot pad an empty dataset")]
    EmptyDataset,
}

impl From<tokenizers::Error> for Error {
    fn from(value: tokenizers::Error) -> Self {
        Error::Tokenizer(value.to_string())
    }
}
