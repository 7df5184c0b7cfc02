//! Minimal event-driven run loop.
//!
//! An [`Engine`] feeds each item of its data to a process function, once per
//! epoch, and fires [`Events`] around every step. Handlers run synchronously
//! on the engine's thread in the order they were attached.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::TrainingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Events {
    Started,
    EpochStarted,
    IterationStarted,
    IterationCompleted,
    EpochCompleted,
    Completed,
}

impl fmt::Display for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Events::Started => "started",
            Events::EpochStarted => "epoch_started",
            Events::IterationStarted => "iteration_started",
            Events::IterationCompleted => "iteration_completed",
            Events::EpochCompleted => "epoch_completed",
            Events::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Run state handed to the process function and to every handler.
#[derive(Debug, Clone, Default)]
pub struct State {
    /// Iterations completed or in progress since the run started (1-based).
    pub iteration: usize,
    /// Current epoch (1-based).
    pub epoch: usize,
    pub max_epochs: usize,
    pub epoch_length: usize,
    /// Output of the most recent process call.
    pub output: Option<f64>,
    pub metrics: BTreeMap<String, f64>,
}

/// Shared read-only view of an engine's counters, for handlers attached to
/// a different engine.
#[derive(Debug, Clone, Default)]
pub struct EngineClock {
    iteration: Arc<AtomicUsize>,
    epoch: Arc<AtomicUsize>,
}

impl EngineClock {
    pub fn iteration(&self) -> usize {
        self.iteration.load(Ordering::Acquire)
    }

    pub fn epoch(&self) -> usize {
        self.epoch.load(Ordering::Acquire)
    }

    fn sync(&self, state: &State) {
        self.iteration.store(state.iteration, Ordering::Release);
        self.epoch.store(state.epoch, Ordering::Release);
    }
}

pub type Handler = Box<dyn FnMut(&mut State) -> Result<(), TrainingError>>;
type ProcessFn<B> = Box<dyn FnMut(&mut State, B) -> Result<f64, TrainingError>>;

pub struct Engine<B> {
    process: ProcessFn<B>,
    handlers: Vec<(Events, Handler)>,
    state: State,
    clock: EngineClock,
}

impl<B: Clone> Engine<B> {
    pub fn new<F>(process: F) -> Self
    where
        F: FnMut(&mut State, B) -> Result<f64, TrainingError> + 'static,
    {
        Self {
            process: Box::new(process),
            handlers: Vec::new(),
            state: State::default(),
            clock: EngineClock::default(),
        }
    }

    pub fn add_event_handler<H>(&mut self, event: Events, handler: H)
    where
        H: FnMut(&mut State) -> Result<(), TrainingError> + 'static,
    {
        self.handlers.push((event, Box::new(handler)));
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn clock(&self) -> EngineClock {
        self.clock.clone()
    }

    /// Runs `max_epochs` passes over `data`. Metrics survive from the
    /// previous run only if no handler resets them.
    pub fn run(&mut self, data: &[B], max_epochs: usize) -> Result<&State, TrainingError> {
        self.state.iteration = 0;
        self.state.epoch = 0;
        self.state.output = None;
        self.state.max_epochs = max_epochs;
        self.state.epoch_length = data.len();
        self.clock.sync(&self.state);

        self.fire(Events::Started)?;
        while self.state.epoch < max_epochs {
            self.state.epoch += 1;
            self.clock.sync(&self.state);
            self.fire(Events::EpochStarted)?;

            for batch in data {
                self.state.iteration += 1;
                self.clock.sync(&self.state);
                self.fire(Events::IterationStarted)?;
                let output = (self.process)(&mut self.state, batch.clone())?;
                self.state.output = Some(output);
                self.fire(Events::IterationCompleted)?;
            }

            self.fire(Events::EpochCompleted)?;
        }
        self.fire(Events::Completed)?;
        Ok(&self.state)
    }

    fn fire(&mut self, event: Events) -> Result<(), TrainingError> {
        for (registered, handler) in self.handlers.iter_mut() {
            if *registered == event {
                handler(&mut self.state)?;
            }
        }
        Ok(())
    }
}
