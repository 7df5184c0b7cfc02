//! Tokenize-and-encode traversal over nested text structures.
//!
//! Inputs are modelled as a [`TextTree`] so the recursion is checked by the
//! compiler: leaves are strings, mappings keep their keys and sequences keep
//! their order. Each leaf becomes the id sequence produced by
//! [`SubwordTokenizer::tokenize`] followed by
//! [`SubwordTokenizer::convert_tokens_to_ids`].

use std::collections::BTreeMap;

use indicatif::{ProgressBar, ProgressStyle};
use tokenizers::Tokenizer;

use crate::errors::{Error, Result};

/// Subword vocabulary capability used to encode text.
pub trait SubwordTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<String>>;
    fn convert_tokens_to_ids(&self, tokens: &[String]) -> Result<Vec<u32>>;

    fn encode_text(&self, text: &str) -> Result<Vec<u32>> {
        let tokens = self.tokenize(text)?;
        self.convert_tokens_to_ids(&tokens)
    }
}

impl SubwordTokenizer for Tokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        let encoding = self.encode(text, false)?;
        Ok(encoding.get_tokens().to_vec())
    }

    fn convert_tokens_to_ids(&self, tokens: &[String]) -> Result<Vec<u32>> {
        tokens
            .iter()
            .map(|token| {
                self.token_to_id(token).ok_or_else(|| {
                    Error::Tokenizer(format!("token '{token}' is not in the vocabulary"))
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextTree {
    Leaf(String),
    Mapping(BTreeMap<String, TextTree>),
    Sequence(Vec<TextTree>),
}

impl TextTree {
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TextTree::Sequence(lines.into_iter().map(|s| TextTree::Leaf(s.into())).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedTree {
    Ids(Vec<u32>),
    Mapping(BTreeMap<String, EncodedTree>),
    Sequence(Vec<EncodedTree>),
}

impl EncodedTree {
    /// Concatenates every id in the tree, depth first.
    pub fn flatten(self) -> Vec<u32> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(self, out: &mut Vec<u32>) {
        match self {
            EncodedTree::Ids(ids) => out.extend(ids),
            EncodedTree::Mapping(map) => map.into_values().for_each(|v| v.flatten_into(out)),
            EncodedTree::Sequence(items) => items.into_iter().for_each(|v| v.flatten_into(out)),
        }
    }

    /// Per-item id rows of a sequence of leaves.
    pub fn into_rows(self) -> Option<Vec<Vec<u32>>> {
        match self {
            EncodedTree::Sequence(items) => items
                .into_iter()
                .map(|item| match item {
                    EncodedTree::Ids(ids) => Some(ids),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }
}

pub fn encode<T: SubwordTokenizer + ?Sized>(tokenizer: &T, tree: &TextTree) -> Result<EncodedTree> {
    match tree {
        TextTree::Leaf(text) => Ok(EncodedTree::Ids(tokenizer.encode_text(text)?)),
        TextTree::Mapping(map) => {
            let mut encoded = BTreeMap::new();
            for (key, value) in map {
                encoded.insert(key.clone(), encode(tokenizer, value)?);
            }
            Ok(EncodedTree::Mapping(encoded))
        }
        TextTree::Sequence(items) => {
            let progress = ProgressBar::new(items.len() as u64);
            if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} ({per_sec})") {
                progress.set_style(style);
            }
            let mut encoded = Vec::with_capacity(items.len());
            for item in items {
                encoded.push(encode(tokenizer, item)?);
                progress.inc(1);
            }
            progress.finish_and_clear();
            Ok(EncodedTree::Sequence(encoded))
        }
    }
}
