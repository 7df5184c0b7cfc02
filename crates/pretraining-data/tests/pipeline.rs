use std::cell::Cell;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use pretraining_data::{
    get_and_tokenize_dataset, get_and_tokenize_source, registry, DatasetRequest, DatasetSource,
    DownloadCache, EncodedSplit, Error, Location, Split, SubwordTokenizer,
};
use tempfile::tempdir;

/// Whitespace tokenizer with a growing vocabulary that counts its calls.
struct CountingTokenizer {
    vocab: HashMap<&'static str, u32>,
    calls: Cell<usize>,
}

impl CountingTokenizer {
    fn new() -> Self {
        let vocab = HashMap::from([
            ("[SEP]", 1),
            ("[UNK]", 2),
            ("hello", 10),
            ("world", 11),
            ("test", 12),
            ("great", 13),
            ("awful", 14),
        ]);
        Self {
            vocab,
            calls: Cell::new(0),
        }
    }
}

impl SubwordTokenizer for CountingTokenizer {
    fn tokenize(&self, text: &str) -> pretraining_data::Result<Vec<String>> {
        self.calls.set(self.calls.get() + 1);
        Ok(text.split_whitespace().map(str::to_string).collect())
    }

    fn convert_tokens_to_ids(&self, tokens: &[String]) -> pretraining_data::Result<Vec<u32>> {
        Ok(tokens
            .iter()
            .map(|token| self.vocab.get(token.as_str()).copied().unwrap_or(0))
            .collect())
    }
}

fn write_corpus(dir: &Path) {
    fs::write(dir.join("train.txt"), "hello world\n<unk> test\n").unwrap();
    fs::write(dir.join("valid.txt"), " test world \n").unwrap();
}

#[test]
fn language_modeling_splits_are_flattened_and_counted() {
    let tmp = tempdir().unwrap();
    write_corpus(tmp.path());
    let tokenizer = CountingTokenizer::new();
    let downloads = DownloadCache::new(tmp.path().join("downloads"));

    let request = DatasetRequest::new(tmp.path().to_string_lossy());
    let dataset = get_and_tokenize_dataset(&tokenizer, &request, &downloads).unwrap();

    let hello = tokenizer.encode_text("hello world [SEP]").unwrap();
    let unk = tokenizer.encode_text("[UNK] test [SEP]").unwrap();
    let expected: Vec<u32> = hello.into_iter().chain(unk).collect();
    assert_eq!(dataset.ids(Split::Train), Some(expected.as_slice()));
    assert_eq!(dataset.num_words(Split::Train), Some(4));

    assert_eq!(dataset.ids(Split::Valid), Some(&[12, 11, 1][..]));
    // The space before the line break is kept, so "\n" counts as a word.
    assert_eq!(dataset.num_words(Split::Valid), Some(3));
    assert_eq!(
        dataset.key_names(),
        vec!["train", "train_num_words", "valid", "valid_num_words"]
    );
}

#[test]
fn second_call_is_served_from_cache() {
    let tmp = tempdir().unwrap();
    write_corpus(tmp.path());
    let cache_path = tmp.path().join("cache").join("dataset.bin");
    let downloads = DownloadCache::new(tmp.path().join("downloads"));
    let request = DatasetRequest::new(tmp.path().to_string_lossy()).cache(&cache_path);

    let first_tokenizer = CountingTokenizer::new();
    let first = get_and_tokenize_dataset(&first_tokenizer, &request, &downloads).unwrap();
    assert!(first_tokenizer.calls.get() > 0);
    let bytes_after_first = fs::read(&cache_path).unwrap();

    // Removing the sources proves the second call never reads them.
    fs::remove_file(tmp.path().join("train.txt")).unwrap();
    fs::remove_file(tmp.path().join("valid.txt")).unwrap();

    let second_tokenizer = CountingTokenizer::new();
    let second = get_and_tokenize_dataset(&second_tokenizer, &request, &downloads).unwrap();
    assert_eq!(second_tokenizer.calls.get(), 0);
    assert_eq!(first, second);
    assert_eq!(fs::read(&cache_path).unwrap(), bytes_after_first);
}

#[test]
fn stale_cache_is_returned_unchecked() {
    let tmp = tempdir().unwrap();
    write_corpus(tmp.path());
    let cache_path = tmp.path().join("dataset.bin");
    let downloads = DownloadCache::new(tmp.path().join("downloads"));
    let tokenizer = CountingTokenizer::new();

    let request = DatasetRequest::new(tmp.path().to_string_lossy()).cache(&cache_path);
    let original = get_and_tokenize_dataset(&tokenizer, &request, &downloads).unwrap();

    let other = DatasetRequest::new("wikitext-2").cache(&cache_path);
    let served = get_and_tokenize_dataset(&tokenizer, &other, &downloads).unwrap();
    assert_eq!(served, original);
}

#[test]
fn missing_split_file_fails_without_caching() {
    let tmp = tempdir().unwrap();
    fs::write(tmp.path().join("train.txt"), "hello\n").unwrap();
    let cache_path = tmp.path().join("dataset.bin");
    let downloads = DownloadCache::new(tmp.path().join("downloads"));

    let request = DatasetRequest::new(tmp.path().to_string_lossy()).cache(&cache_path);
    let err =
        get_and_tokenize_dataset(&CountingTokenizer::new(), &request, &downloads).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert!(!cache_path.exists());
}

fn labeled_source(dir: &Path, train_labels: &str) -> DatasetSource {
    fs::write(dir.join("train.txt"), "great test\nawful world\n").unwrap();
    fs::write(dir.join("valid.txt"), "hello\n").unwrap();
    fs::write(dir.join("train.labels.txt"), train_labels).unwrap();
    fs::write(dir.join("valid.labels.txt"), "neg\n").unwrap();

    let mut source = DatasetSource::from_directory(dir);
    let mut labels = registry::lookup("imdb").unwrap().labels.unwrap();
    labels.train = Location::Local(dir.join("train.labels.txt"));
    labels.valid = Location::Local(dir.join("valid.labels.txt"));
    source.labels = Some(labels);
    source
}

#[test]
fn labeled_dataset_keeps_rows_and_converts_labels() {
    let tmp = tempdir().unwrap();
    let source = labeled_source(tmp.path(), "pos\nneg\n");
    let downloads = DownloadCache::new(tmp.path().join("downloads"));
    let request = DatasetRequest::new("imdb").with_labels(true);

    let dataset =
        get_and_tokenize_source(&CountingTokenizer::new(), &source, &request, &downloads).unwrap();

    assert_eq!(dataset.labels(Split::Train), Some(&[0, 1][..]));
    assert_eq!(dataset.labels(Split::Valid), Some(&[1][..]));
    assert_eq!(
        dataset.split(Split::Train),
        Some(&EncodedSplit::Classification {
            rows: vec![vec![13, 12, 1], vec![14, 11, 1]],
            labels: vec![0, 1],
        })
    );
    assert!(dataset.num_words(Split::Train).is_none());
}

#[test]
fn unknown_label_is_a_lookup_failure() {
    let tmp = tempdir().unwrap();
    let source = labeled_source(tmp.path(), "pos\nneutral\n");
    let downloads = DownloadCache::new(tmp.path().join("downloads"));
    let request = DatasetRequest::new("imdb").with_labels(true);

    let err = get_and_tokenize_source(&CountingTokenizer::new(), &source, &request, &downloads)
        .unwrap_err();
    match err {
        Error::UnknownLabel { label, split } => {
            assert_eq!(label, "neutral");
            assert_eq!(split, "train");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn local_directory_has_no_labels() {
    let tmp = tempdir().unwrap();
    write_corpus(tmp.path());
    let downloads = DownloadCache::new(tmp.path().join("downloads"));
    let request = DatasetRequest::new(tmp.path().to_string_lossy()).with_labels(true);

    let err =
        get_and_tokenize_dataset(&CountingTokenizer::new(), &request, &downloads).unwrap_err();
    assert!(matches!(err, Error::MissingLabels(_)));
}
