use std::{
    cell::RefCell,
    fs::{self, File},
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
    rc::Rc,
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::BytesMut;
use candle_nn::Optimizer;
use crc32fast::Hasher as Crc32;
use prost::Message;

use crate::{
    engine::{Engine, Events},
    TrainingError,
};

/// Read access to an optimizer's per-group hyper-parameters.
pub trait ParamGroups {
    fn learning_rates(&self) -> Vec<f64>;
}

impl ParamGroups for candle_nn::SGD {
    fn learning_rates(&self) -> Vec<f64> {
        vec![Optimizer::learning_rate(self)]
    }
}

impl ParamGroups for candle_nn::AdamW {
    fn learning_rates(&self) -> Vec<f64> {
        vec![Optimizer::learning_rate(self)]
    }
}

/// Scalar writer producing TensorBoard event files, shared by the handlers
/// attached to one or more engines.
#[derive(Clone)]
pub struct TensorboardLogger {
    log_dir: PathBuf,
    writer: Rc<RefCell<TensorBoardWriter>>,
}

impl TensorboardLogger {
    /// Opens a writer in `log_dir`, or in `runs/<timestamp>_<host>` when no
    /// directory is given.
    pub fn new(log_dir: Option<PathBuf>, flush_every: usize) -> Result<Self, TrainingError> {
        let log_dir = log_dir.unwrap_or_else(default_log_dir);
        let writer = TensorBoardWriter::create(&log_dir, flush_every)?;
        log::info!("tensorboard events written to {}", writer.path.display());
        Ok(Self {
            log_dir,
            writer: Rc::new(RefCell::new(writer)),
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn event_file(&self) -> PathBuf {
        self.writer.borrow().path.clone()
    }

    pub fn add_scalar(&self, tag: &str, value: f64, step: usize) -> Result<(), TrainingError> {
        self.writer
            .borrow_mut()
            .write_scalar(tag, step as i64, value)
    }

    /// Writes `<tag>/<metric>` for each named metric present in the engine
    /// state, stepped by the engine's iteration.
    pub fn attach_output_handler<B: Clone>(
        &self,
        engine: &mut Engine<B>,
        event: Events,
        tag: &str,
        metric_names: &[&str],
    ) {
        let logger = self.clone();
        let tag = tag.to_string();
        let names: Vec<String> = metric_names.iter().map(|n| n.to_string()).collect();
        engine.add_event_handler(event, move |state| {
            for name in &names {
                if let Some(value) = state.metrics.get(name) {
                    logger.add_scalar(&format!("{tag}/{name}"), *value, state.iteration)?;
                }
            }
            Ok(())
        });
    }

    /// Writes `lr/group_<i>` for each optimizer parameter group.
    pub fn attach_optimizer_params_handler<B: Clone>(
        &self,
        engine: &mut Engine<B>,
        event: Events,
        optimizer: Rc<dyn ParamGroups>,
    ) {
        let logger = self.clone();
        engine.add_event_handler(event, move |state| {
            for (group, lr) in optimizer.learning_rates().into_iter().enumerate() {
                logger.add_scalar(&format!("lr/group_{group}"), lr, state.iteration)?;
            }
            Ok(())
        });
    }

    pub fn flush(&self) -> Result<(), TrainingError> {
        self.writer.borrow_mut().flush()
    }
}

struct TensorBoardWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    flush_every: usize,
    pending: usize,
}

impl TensorBoardWriter {
    fn create(dir: &Path, flush_every: usize) -> Result<Self, TrainingError> {
        fs::create_dir_all(dir).map_err(|err| {
            TrainingError::initialization(format!(
                "failed to create tensorboard directory {}: {err}",
                dir.display()
            ))
        })?;
        let timestamp = current_unix_timestamp();
        let hostname = hostname();
        let filename = format!("events.out.tfevents.{}.{}", timestamp, hostname);
        let path = dir.join(filename);
        let file = File::create(&path).map_err(|err| {
            TrainingError::initialization(format!(
                "failed to create tensorboard file {}: {err}",
                path.display()
            ))
        })?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            flush_every: flush_every.max(1),
            pending: 0,
        })
    }

    fn write_scalar(&mut self, tag: &str, step: i64, value: f64) -> Result<(), TrainingError> {
        let wall_time = current_wall_time();
        let summary = Summary {
            value: vec![summary::Value {
                tag: tag.to_string(),
                simple_value: Some(value as f32),
            }],
        };
        let event = Event {
            wall_time,
            step,
            summary: Some(summary),
        };
        self.write_event(&event)
    }

    fn write_event(&mut self, event: &Event) -> Result<(), TrainingError> {
        let mut buffer = BytesMut::with_capacity(128);
        event.encode(&mut buffer).map_err(|err| {
            TrainingError::runtime(format!("failed to encode tensorboard event: {err}"))
        })?;

        let data = buffer.freeze();
        let len_bytes = (data.len() as u64).to_le_bytes();
        let len_crc = masked_crc32(&len_bytes);
        let data_crc = masked_crc32(data.as_ref());

        self.writer
            .write_all(&len_bytes)
            .and_then(|_| self.writer.write_all(&len_crc.to_le_bytes()))
            .and_then(|_| self.writer.write_all(&data))
            .and_then(|_| self.writer.write_all(&data_crc.to_le_bytes()))
            .map_err(|err| {
                TrainingError::runtime(format!("failed to write tensorboard event: {err}"))
            })?;

        self.pending += 1;
        if self.pending >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TrainingError> {
        self.writer.flush().map_err(|err| {
            TrainingError::runtime(format!("failed to flush tensorboard file: {err}"))
        })?;
        self.pending = 0;
        Ok(())
    }
}

impl Drop for TensorBoardWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// A scalar decoded from an event file.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarRecord {
    pub tag: String,
    pub step: i64,
    pub value: f32,
}

/// Reads back every scalar in an event file, verifying record checksums.
pub fn read_scalars(path: &Path) -> Result<Vec<ScalarRecord>, TrainingError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    loop {
        let mut len_bytes = [0u8; 8];
        match reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        }
        let mut crc = [0u8; 4];
        reader.read_exact(&mut crc)?;
        if u32::from_le_bytes(crc) != masked_crc32(&len_bytes) {
            return Err(TrainingError::runtime("corrupt tensorboard record length"));
        }
        let mut data = vec![0u8; u64::from_le_bytes(len_bytes) as usize];
        reader.read_exact(&mut data)?;
        reader.read_exact(&mut crc)?;
        if u32::from_le_bytes(crc) != masked_crc32(&data) {
            return Err(TrainingError::runtime("corrupt tensorboard record payload"));
        }
        let event = Event::decode(data.as_slice()).map_err(|err| {
            TrainingError::runtime(format!("failed to decode tensorboard event: {err}"))
        })?;
        for value in event.summary.map(|s| s.value).unwrap_or_default() {
            if let Some(simple) = value.simple_value {
                records.push(ScalarRecord {
                    tag: value.tag,
                    step: event.step,
                    value: simple,
                });
            }
        }
    }
    Ok(records)
}

fn masked_crc32(data: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(data);
    let crc = hasher.finalize();
    ((crc >> 15) | (crc << 17)).wrapping_add(0xa282_ead8)
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("runs").join(format!("{}_{}", current_unix_timestamp(), hostname()))
}

fn current_unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn current_wall_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_secs_f64())
        .unwrap_or(0.0)
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

#[derive(Clone, PartialEq, Message)]
struct Event {
    #[prost(double, tag = "1")]
    wall_time: f64,
    #[prost(int64, tag = "2")]
    step: i64,
    #[prost(message, optional, tag = "5")]
    summary: Option<Summary>,
}

#[derive(Clone, PartialEq, Message)]
struct Summary {
    #[prost(message, repeated, tag = "1")]
    value: Vec<summary::Value>,
}

mod summary {
    use prost::Message;

    #[derive(Clone, PartialEq, Message)]
    pub struct Value {
        #[prost(string, tag = "1")]
        pub tag: String,
        #[prost(float, optional, tag = "2")]
        pub simple_value: Option<f32>,
    }
}
