//! Logger installation with a runtime gate on the `tokenizers` target.
//!
//! [`init`] wraps an `env_logger` logger so that records emitted by the
//! tokenizer library can be silenced for the duration of a
//! [`TokenizerLogGate`]. The gate only affects loggers installed through
//! [`init`].

use std::sync::atomic::{AtomicUsize, Ordering};

use env_logger::Env;
use log::{LevelFilter, Log, Metadata, Record};

const TOKENIZER_TARGET: &str = "tokenizers";

static TOKENIZER_LEVEL: AtomicUsize = AtomicUsize::new(LevelFilter::Trace as usize);

struct GatedLogger {
    inner: env_logger::Logger,
}

impl GatedLogger {
    fn passes_gate(metadata: &Metadata<'_>) -> bool {
        if !metadata.target().starts_with(TOKENIZER_TARGET) {
            return true;
        }
        (metadata.level() as usize) <= TOKENIZER_LEVEL.load(Ordering::Relaxed)
    }
}

impl Log for GatedLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        Self::passes_gate(metadata) && self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if Self::passes_gate(record.metadata()) {
            self.inner.log(record);
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Installs the process logger, honouring `RUST_LOG` (default `info`).
/// Returns `false` if a logger was already installed.
pub fn init() -> bool {
    let inner = env_logger::Builder::from_env(Env::default().default_filter_or("info")).build();
    let max_level = inner.filter();
    if log::set_boxed_logger(Box::new(GatedLogger { inner })).is_err() {
        return false;
    }
    log::set_max_level(max_level);
    true
}

pub fn tokenizer_level() -> LevelFilter {
    match TOKENIZER_LEVEL.load(Ordering::Relaxed) {
        0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Lowers tokenizer log verbosity until dropped, then restores the previous
/// level.
#[must_use = "the previous level is restored when the gate is dropped"]
pub struct TokenizerLogGate {
    previous: usize,
}

impl TokenizerLogGate {
    pub fn limit(level: LevelFilter) -> Self {
        let previous = TOKENIZER_LEVEL.swap(level as usize, Ordering::Relaxed);
        Self { previous }
    }

    pub fn errors_only() -> Self {
        Self::limit(LevelFilter::Error)
    }
}

impl Drop for TokenizerLogGate {
    fn drop(&mut self) {
        TOKENIZER_LEVEL.store(self.previous, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;
    use std::sync::Mutex;

    // The gate level is process-wide; tests touching it take turns.
    static GATE_LOCK: Mutex<()> = Mutex::new(());

    fn record_passes(target: &str, level: Level) -> bool {
        let metadata = Metadata::builder().target(target).level(level).build();
        GatedLogger::passes_gate(&metadata)
    }

    #[test]
    fn gate_filters_tokenizer_records_while_held() {
        let _serial = GATE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        {
            let _quiet = TokenizerLogGate::errors_only();
            assert!(!record_passes("tokenizers::models::bpe", Level::Warn));
            assert!(record_passes("tokenizers::models::bpe", Level::Error));
            assert!(record_passes("pretraining_data::pipeline", Level::Warn));
        }
        assert!(record_passes("tokenizers::models::bpe", Level::Warn));
    }

    #[test]
    fn gate_restores_previous_level() {
        let _serial = GATE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let before = tokenizer_level();
        {
            let _outer = TokenizerLogGate::limit(LevelFilter::Warn);
            assert_eq!(tokenizer_level(), LevelFilter::Warn);
            {
                let _inner = TokenizerLogGate::errors_only();
                assert_eq!(tokenizer_level(), LevelFilter::Error);
            }
            assert_eq!(tokenizer_level(), LevelFilter::Warn);
        }
        assert_eq!(tokenizer_level(), before);
    }
}
