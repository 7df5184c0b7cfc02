use std::{cell::RefCell, rc::Rc};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::engine::{Engine, Events};

const BAR_TEMPLATE: &str =
    "Epoch {prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}";

/// Per-epoch progress bar over a training engine's iterations.
pub struct EpochProgress {
    persist: bool,
    hidden: bool,
    bar: Option<ProgressBar>,
    last_message: Option<String>,
    message_count: usize,
}

impl EpochProgress {
    pub fn new(persist: bool) -> Self {
        Self {
            persist,
            hidden: false,
            bar: None,
            last_message: None,
            message_count: 0,
        }
    }

    /// A bar that never draws; the last message is still kept.
    pub fn hidden() -> Self {
        Self {
            hidden: true,
            ..Self::new(false)
        }
    }

    /// Prints above the bar, or on stderr when no bar is active.
    pub fn log_message(&mut self, message: &str) {
        match &self.bar {
            Some(bar) if !bar.is_finished() => bar.println(message),
            _ if !self.hidden => eprintln!("{message}"),
            _ => {}
        }
        self.last_message = Some(message.to_string());
        self.message_count += 1;
    }

    pub fn last_message(&self) -> Option<&str> {
        self.last_message.as_deref()
    }

    pub fn message_count(&self) -> usize {
        self.message_count
    }

    fn start_epoch(&mut self, epoch: usize, max_epochs: usize, length: usize) {
        let bar = if self.hidden {
            ProgressBar::with_draw_target(Some(length as u64), ProgressDrawTarget::hidden())
        } else {
            ProgressBar::new(length as u64)
        };
        if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.set_prefix(format!("{epoch}/{max_epochs}"));
        self.bar = Some(bar);
    }

    fn advance(&self, loss: Option<f64>) {
        if let Some(bar) = &self.bar {
            if let Some(loss) = loss {
                bar.set_message(format!("loss: {loss:.4}"));
            }
            bar.inc(1);
        }
    }

    fn finish_epoch(&mut self) {
        if let Some(bar) = &self.bar {
            if self.persist {
                bar.finish();
            } else {
                bar.finish_and_clear();
            }
        }
    }

    /// Drives the bar from the engine's epoch and iteration events, showing
    /// the `metric` value after each iteration.
    pub fn attach<B: Clone>(self, engine: &mut Engine<B>, metric: &str) -> Rc<RefCell<Self>> {
        let shared = Rc::new(RefCell::new(self));

        let on_epoch = Rc::clone(&shared);
        engine.add_event_handler(Events::EpochStarted, move |state| {
            on_epoch
                .borrow_mut()
                .start_epoch(state.epoch, state.max_epochs, state.epoch_length);
            Ok(())
        });

        let on_iteration = Rc::clone(&shared);
        let metric = metric.to_string();
        engine.add_event_handler(Events::IterationCompleted, move |state| {
            on_iteration
                .borrow()
                .advance(state.metrics.get(&metric).copied());
            Ok(())
        });

        let on_epoch_end = Rc::clone(&shared);
        engine.add_event_handler(Events::EpochCompleted, move |_state| {
            on_epoch_end.borrow_mut().finish_epoch();
            Ok(())
        });

        shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::State;

    #[test]
    fn bar_tracks_iterations_within_epoch() {
        let mut engine = Engine::new(|state: &mut State, batch: f64| {
            state.metrics.insert("loss".into(), batch);
            Ok(batch)
        });
        let progress = EpochProgress::hidden().attach(&mut engine, "loss");

        let seen = Rc::new(RefCell::new(Vec::new()));
        let record = Rc::clone(&seen);
        let bar_view = Rc::clone(&progress);
        engine.add_event_handler(Events::IterationCompleted, move |_state| {
            let position = bar_view.borrow().bar.as_ref().map(|bar| bar.position());
            record.borrow_mut().push(position);
            Ok(())
        });

        engine.run(&[1.0, 2.0, 3.0], 2).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![Some(1), Some(2), Some(3), Some(1), Some(2), Some(3)]
        );
        assert!(progress.borrow().bar.as_ref().unwrap().is_finished());
    }

    #[test]
    fn only_the_last_message_is_kept() {
        let mut progress = EpochProgress::hidden();
        assert_eq!(progress.last_message(), None);
        progress.log_message("Validation: {}");
        progress.log_message("Validation: {\"nll\": 1.0}");
        assert_eq!(progress.last_message(), Some("Validation: {\"nll\": 1.0}"));
        assert_eq!(progress.message_count(), 2);
    }
}
