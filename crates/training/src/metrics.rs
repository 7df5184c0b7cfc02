use std::cell::RefCell;
use std::rc::Rc;

use crate::{
    distributed::{average_distributed_scalar, DistributedContext},
    engine::{Engine, Events},
};

#[derive(Debug, Clone)]
pub struct ExponentialMovingAverage {
    alpha: f64,
    value: Option<f64>,
}

impl ExponentialMovingAverage {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        let v = match self.value {
            Some(prev) => self.alpha * sample + (1.0 - self.alpha) * prev,
            None => sample,
        };
        self.value = Some(v);
        v
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// Smoothed running value of the per-iteration output.
///
/// `alpha` weighs the previous value: `v = alpha * v + (1 - alpha) * x`.
/// The average restarts at every epoch.
#[derive(Debug, Clone)]
pub struct RunningAverage {
    ema: ExponentialMovingAverage,
}

impl RunningAverage {
    pub const DEFAULT_ALPHA: f64 = 0.98;

    pub fn new(alpha: f64) -> Self {
        Self {
            ema: ExponentialMovingAverage::new(1.0 - alpha),
        }
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        self.ema.update(sample)
    }

    pub fn value(&self) -> Option<f64> {
        self.ema.value()
    }

    pub fn attach<B: Clone>(self, engine: &mut Engine<B>, name: &str) {
        let shared = Rc::new(RefCell::new(self));

        let on_epoch = Rc::clone(&shared);
        engine.add_event_handler(Events::EpochStarted, move |_state| {
            on_epoch.borrow_mut().ema.reset();
            Ok(())
        });

        let name = name.to_string();
        engine.add_event_handler(Events::IterationCompleted, move |state| {
            if let Some(output) = state.output {
                let value = shared.borrow_mut().update(output);
                state.metrics.insert(name.clone(), value);
            }
            Ok(())
        });
    }
}

impl Default for RunningAverage {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ALPHA)
    }
}

/// Mean of the per-iteration output over a whole run, averaged across
/// workers when running distributed.
#[derive(Debug, Default)]
pub struct Average {
    sum: f64,
    count: u64,
}

impl Average {
    pub fn update(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn compute(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }

    pub fn attach<B: Clone>(self, engine: &mut Engine<B>, name: &str, context: DistributedContext) {
        let shared = Rc::new(RefCell::new(self));

        let on_start = Rc::clone(&shared);
        engine.add_event_handler(Events::Started, move |_state| {
            on_start.borrow_mut().reset();
            Ok(())
        });

        let on_iteration = Rc::clone(&shared);
        engine.add_event_handler(Events::IterationCompleted, move |state| {
            if let Some(output) = state.output {
                on_iteration.borrow_mut().update(output);
            }
            Ok(())
        });

        let name = name.to_string();
        engine.add_event_handler(Events::Completed, move |state| {
            // Every worker takes part in the reduction, even with no samples.
            let local = shared.borrow().compute().unwrap_or(0.0);
            let value = average_distributed_scalar(local, &context)?;
            state.metrics.insert(name.clone(), value);
            Ok(())
        });
    }
}
