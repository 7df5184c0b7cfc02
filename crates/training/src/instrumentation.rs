//! One-call wiring of logging, progress display and checkpointing onto a
//! trainer/evaluator pair.

use std::{cell::RefCell, path::PathBuf, rc::Rc};

use pretraining_data::registry::CONFIG_NAME;

use crate::{
    checkpoint::{save_config, Checkpointable, ModelCheckpoint},
    engine::{Engine, Events},
    logging::{ParamGroups, TensorboardLogger},
    metrics::RunningAverage,
    progress::EpochProgress,
    TrainingConfig, TrainingError,
};

/// Name the model is saved under inside checkpoint file names.
pub const MODEL_CHECKPOINT_NAME: &str = "mymodel";

/// Handles to everything attached by [`add_logging_and_checkpoint_saving`].
pub struct Instrumentation {
    pub log_dir: PathBuf,
    pub progress: Rc<RefCell<EpochProgress>>,
    pub tensorboard: TensorboardLogger,
    pub checkpoint: Rc<RefCell<ModelCheckpoint>>,
}

/// Attaches a running `loss`, a progress bar, TensorBoard scalars and
/// per-epoch model checkpoints to `trainer`, logs `metric_names` from
/// `evaluator` after each evaluation run and stores `config` next to the
/// event files.
///
/// `model` must be the parameter store itself, not a wrapper around it.
pub fn add_logging_and_checkpoint_saving<B: Clone, E: Clone>(
    trainer: &mut Engine<B>,
    evaluator: &mut Engine<E>,
    metric_names: &[&str],
    model: Rc<dyn Checkpointable>,
    optimizer: Rc<dyn ParamGroups>,
    config: &TrainingConfig,
) -> Result<Instrumentation, TrainingError> {
    RunningAverage::new(config.logging.running_average_alpha).attach(trainer, "loss");

    let progress = EpochProgress::new(config.logging.progress_persist).attach(trainer, "loss");
    let pbar = Rc::clone(&progress);
    evaluator.add_event_handler(Events::Completed, move |state| {
        pbar.borrow_mut()
            .log_message(&format!("Validation: {:#?}", state.metrics));
        Ok(())
    });

    let tensorboard = TensorboardLogger::new(
        config.runtime.log_dir.clone(),
        config.logging.tensorboard_flush_every_n,
    )?;
    tensorboard.attach_output_handler(trainer, Events::IterationCompleted, "training", &["loss"]);
    tensorboard.attach_optimizer_params_handler(trainer, Events::IterationStarted, optimizer);

    let writer = tensorboard.clone();
    let trainer_clock = trainer.clock();
    let names: Vec<String> = metric_names.iter().map(|n| n.to_string()).collect();
    evaluator.add_event_handler(Events::Completed, move |state| {
        for name in &names {
            let value = state.metrics.get(name).copied().ok_or_else(|| {
                TrainingError::runtime(format!("evaluator produced no metric named '{name}'"))
            })?;
            writer.add_scalar(name, value, trainer_clock.iteration())?;
        }
        Ok(())
    });

    let log_dir = tensorboard.log_dir().to_path_buf();
    let checkpoint = ModelCheckpoint::new(
        &log_dir,
        config.checkpoint.prefix.clone(),
        config.checkpoint.save_interval,
        config.checkpoint.n_saved,
    )?
    .attach(trainer, vec![(MODEL_CHECKPOINT_NAME.to_string(), model)]);

    save_config(config, &log_dir.join(CONFIG_NAME))?;
    log::info!("training artifacts written to {}", log_dir.display());

    Ok(Instrumentation {
        log_dir,
        progress,
        tensorboard,
        checkpoint,
    })
}
