use std::path::PathBuf;

use clap::Parser;
use pretraining_data::{
    get_and_tokenize_dataset, logging, DatasetRequest, DownloadCache, EncodedSplit,
};
use tokenizers::Tokenizer;

#[derive(Parser, Debug)]
#[command(author, version, about = "Download, encode and cache a text dataset", long_about = None)]
struct Args {
    #[arg(long, value_name = "PATH", help = "Path to tokenizer.json")]
    tokenizer: PathBuf,

    #[arg(
        long,
        default_value = pretraining_data::pipeline::DEFAULT_DATASET,
        help = "Registered dataset name or directory with train.txt/valid.txt"
    )]
    dataset: String,

    #[arg(long, value_name = "PATH", help = "Encoded dataset cache file")]
    cache: Option<PathBuf>,

    #[arg(long, help = "Prepare a labeled classification dataset")]
    with_labels: bool,

    #[arg(long, value_name = "DIR", help = "Directory for downloaded resources")]
    download_dir: Option<PathBuf>,
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("preprocessing failed: {}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let tokenizer = Tokenizer::from_file(&args.tokenizer).map_err(|err| {
        format!("failed to load tokenizer {}: {err}", args.tokenizer.display())
    })?;
    let downloads = args
        .download_dir
        .map(DownloadCache::new)
        .unwrap_or_else(DownloadCache::from_env);

    let mut request = DatasetRequest::new(args.dataset).with_labels(args.with_labels);
    request.dataset_cache = args.cache;

    let dataset = get_and_tokenize_dataset(&tokenizer, &request, &downloads)?;

    for (split, encoded) in dataset.splits() {
        match encoded {
            EncodedSplit::LanguageModeling { ids, num_words } => log::info!(
                "{split}: {} tokens, {} words ({:.3} tokens/word)",
                ids.len(),
                num_words,
                ids.len() as f64 / (*num_words).max(1) as f64
            ),
            EncodedSplit::Classification { rows, labels } => log::info!(
                "{split}: {} examples, {} labels, longest {} tokens",
                rows.len(),
                labels.len(),
                rows.iter().map(Vec::len).max().unwrap_or(0)
            ),
        }
    }

    Ok(())
}
