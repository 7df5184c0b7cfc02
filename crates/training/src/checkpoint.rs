use std::{
    cell::RefCell,
    collections::VecDeque,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    rc::Rc,
};

use candle_nn::VarMap;
use serde::Serialize;

use crate::{
    engine::{Engine, Events},
    TrainingError,
};

pub const CHECKPOINT_EXTENSION: &str = "safetensors";

/// Something whose parameters can be written to a single file.
///
/// Implementors hand over the canonical parameter store, never a wrapper
/// around it, so the saved names match what a loader expects.
pub trait Checkpointable {
    fn save_to(&self, path: &Path) -> Result<(), TrainingError>;
}

impl Checkpointable for VarMap {
    fn save_to(&self, path: &Path) -> Result<(), TrainingError> {
        if self.all_vars().is_empty() {
            return Err(TrainingError::runtime(
                "model contains no parameters to checkpoint",
            ));
        }
        self.save(path).map_err(|err| {
            TrainingError::runtime(format!(
                "failed to serialize model weights to {}: {err}",
                path.display()
            ))
        })
    }
}

/// Saves named objects every `save_interval` calls and keeps only the
/// `n_saved` most recent files.
pub struct ModelCheckpoint {
    dirname: PathBuf,
    prefix: String,
    save_interval: usize,
    n_saved: usize,
    calls: usize,
    saved: VecDeque<Vec<PathBuf>>,
}

impl ModelCheckpoint {
    pub fn new(
        dirname: impl Into<PathBuf>,
        prefix: impl Into<String>,
        save_interval: usize,
        n_saved: usize,
    ) -> Result<Self, TrainingError> {
        let dirname = dirname.into();
        if save_interval == 0 || n_saved == 0 {
            return Err(TrainingError::initialization(
                "checkpoint save_interval and n_saved must be greater than 0",
            ));
        }
        fs::create_dir_all(&dirname).map_err(|err| {
            TrainingError::initialization(format!(
                "failed to create checkpoint directory {}: {err}",
                dirname.display()
            ))
        })?;
        Ok(Self {
            dirname,
            prefix: prefix.into(),
            save_interval,
            n_saved,
            calls: 0,
            saved: VecDeque::new(),
        })
    }

    pub fn dirname(&self) -> &Path {
        &self.dirname
    }

    /// Files currently retained, oldest first.
    pub fn saved_files(&self) -> Vec<PathBuf> {
        self.saved.iter().flatten().cloned().collect()
    }

    /// Counts one call and, on every `save_interval`-th, writes
    /// `<prefix>_<name>_<n>.safetensors` for each object.
    pub fn call(
        &mut self,
        objects: &[(&str, &dyn Checkpointable)],
    ) -> Result<Option<Vec<PathBuf>>, TrainingError> {
        self.calls += 1;
        if self.calls % self.save_interval != 0 {
            return Ok(None);
        }

        let mut written = Vec::with_capacity(objects.len());
        for (name, object) in objects {
            let path = self.dirname.join(format!(
                "{}_{}_{}.{}",
                self.prefix, name, self.calls, CHECKPOINT_EXTENSION
            ));
            object.save_to(&path)?;
            log::debug!("saved checkpoint {}", path.display());
            written.push(path);
        }
        self.saved.push_back(written.clone());
        self.prune()?;
        Ok(Some(written))
    }

    /// Runs the checkpoint on every trainer `EpochCompleted`.
    pub fn attach<B: Clone>(
        self,
        engine: &mut Engine<B>,
        objects: Vec<(String, Rc<dyn Checkpointable>)>,
    ) -> Rc<RefCell<ModelCheckpoint>> {
        let shared = Rc::new(RefCell::new(self));
        let handler = Rc::clone(&shared);
        engine.add_event_handler(Events::EpochCompleted, move |_state| {
            let borrowed: Vec<(&str, &dyn Checkpointable)> = objects
                .iter()
                .map(|(name, object)| (name.as_str(), object.as_ref()))
                .collect();
            handler.borrow_mut().call(&borrowed)?;
            Ok(())
        });
        shared
    }

    fn prune(&mut self) -> Result<(), TrainingError> {
        while self.saved.len() > self.n_saved {
            let Some(victims) = self.saved.pop_front() else {
                break;
            };
            for victim in victims {
                fs::remove_file(&victim).map_err(|err| {
                    TrainingError::runtime(format!(
                        "failed to prune checkpoint {}: {err}",
                        victim.display()
                    ))
                })?;
            }
        }
        Ok(())
    }
}

/// Writes `value` with bincode, replacing any existing file.
pub fn save_config<T: Serialize>(value: &T, path: &Path) -> Result<(), TrainingError> {
    let file = File::create(path).map_err(|err| {
        TrainingError::runtime(format!("failed to create {}: {err}", path.display()))
    })?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}
