//! Dataset preparation for language-model fine-tuning.
//!
//! Resolves a dataset identifier against the built-in [`registry`], fetches
//! each split through the [`download`] cache, normalises lines, encodes them
//! with a [`SubwordTokenizer`] and persists the result as an
//! [`EncodedDataset`]. See [`pipeline::get_and_tokenize_dataset`].

pub mod dataset;
pub mod download;
pub mod encoding;
pub mod errors;
pub mod logging;
pub mod padding;
pub mod pipeline;
pub mod preprocessing;
pub mod registry;

pub use dataset::{EncodedDataset, EncodedSplit};
pub use download::DownloadCache;
pub use encoding::{EncodedTree, SubwordTokenizer, TextTree};
pub use errors::{Error, Result};
pub use padding::{pad_dataset, pad_dataset_default};
pub use pipeline::{get_and_tokenize_dataset, get_and_tokenize_source, DatasetRequest};
pub use registry::{DatasetSource, Location, Split};
