pub mod checkpoint;
pub mod config;
pub mod distributed;
pub mod engine;
pub mod instrumentation;
pub mod logging;
pub mod metrics;
pub mod progress;

pub use checkpoint::{Checkpointable, ModelCheckpoint};
pub use config::{TrainingConfig, TrainingError};
pub use distributed::{average_distributed_scalar, DistributedContext, LocalProcessGroup};
pub use engine::{Engine, EngineClock, Events, State};
pub use instrumentation::{add_logging_and_checkpoint_saving, Instrumentation};
pub use logging::{ParamGroups, TensorboardLogger};
pub use metrics::{Average, RunningAverage};
pub use progress::EpochProgress;
