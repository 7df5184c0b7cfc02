//! Scalar averaging across data-parallel workers.
//!
//! Collective calls block until every member of the group has made the
//! matching call. Members must issue collectives in the same order; a member
//! that never arrives leaves the rest of the group waiting indefinitely.

use std::sync::{Arc, Condvar, Mutex};

use crate::{config::RuntimeConfig, TrainingError};

/// Rank value meaning "not running distributed".
pub const NOT_DISTRIBUTED: i32 = -1;

pub trait Collective: Send + Sync {
    fn world_size(&self) -> usize;
    fn rank(&self) -> usize;
    /// Sums `value` over all members; every member receives the same total.
    fn all_reduce_sum(&self, value: f64) -> Result<f64, TrainingError>;
}

#[derive(Clone)]
pub struct DistributedContext {
    pub local_rank: i32,
    group: Option<Arc<dyn Collective>>,
}

impl DistributedContext {
    pub fn single_process() -> Self {
        Self {
            local_rank: NOT_DISTRIBUTED,
            group: None,
        }
    }

    pub fn new(local_rank: i32, group: Option<Arc<dyn Collective>>) -> Self {
        Self { local_rank, group }
    }

    pub fn with_group(group: Arc<dyn Collective>) -> Self {
        let local_rank = i32::try_from(group.rank()).unwrap_or(i32::MAX);
        Self {
            local_rank,
            group: Some(group),
        }
    }

    /// Context for the configured `local_rank`. The group is ignored when the
    /// run is not distributed.
    pub fn from_config(runtime: &RuntimeConfig, group: Option<Arc<dyn Collective>>) -> Self {
        if runtime.local_rank == NOT_DISTRIBUTED {
            return Self::single_process();
        }
        Self::new(runtime.local_rank, group)
    }

    pub fn is_distributed(&self) -> bool {
        self.local_rank != NOT_DISTRIBUTED
    }

    pub fn group(&self) -> Option<&Arc<dyn Collective>> {
        self.group.as_ref()
    }
}

impl Default for DistributedContext {
    fn default() -> Self {
        Self::single_process()
    }
}

impl std::fmt::Debug for DistributedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedContext")
            .field("local_rank", &self.local_rank)
            .field("world_size", &self.group.as_ref().map(|g| g.world_size()))
            .finish()
    }
}

/// Averages `scalar` over all workers. Used for distributed evaluation.
///
/// Returns the value unchanged outside distributed runs.
pub fn average_distributed_scalar(
    scalar: f64,
    context: &DistributedContext,
) -> Result<f64, TrainingError> {
    if !context.is_distributed() {
        return Ok(scalar);
    }
    let group = context.group().ok_or_else(|| {
        TrainingError::runtime(format!(
            "rank {} requested a collective but no process group is initialized",
            context.local_rank
        ))
    })?;
    let world_size = group.world_size().max(1) as f64;
    group.all_reduce_sum(scalar / world_size)
}

struct Round {
    generation: u64,
    arrived: usize,
    sum: f64,
    result: f64,
}

struct SharedGroup {
    world_size: usize,
    round: Mutex<Round>,
    completed: Condvar,
}

/// In-process collective group whose members run on separate threads.
pub struct LocalProcessGroup;

impl LocalProcessGroup {
    /// Creates `world_size` members; hand one to each worker thread.
    pub fn new(world_size: usize) -> Vec<LocalMember> {
        let shared = Arc::new(SharedGroup {
            world_size,
            round: Mutex::new(Round {
                generation: 0,
                arrived: 0,
                sum: 0.0,
                result: 0.0,
            }),
            completed: Condvar::new(),
        });
        (0..world_size)
            .map(|rank| LocalMember {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

pub struct LocalMember {
    rank: usize,
    shared: Arc<SharedGroup>,
}

impl Collective for LocalMember {
    fn world_size(&self) -> usize {
        self.shared.world_size
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn all_reduce_sum(&self, value: f64) -> Result<f64, TrainingError> {
        let poisoned = |_| TrainingError::runtime("process group state poisoned");
        let mut round = self.shared.round.lock().map_err(poisoned)?;
        let generation = round.generation;
        round.sum += value;
        round.arrived += 1;

        if round.arrived == self.shared.world_size {
            round.result = round.sum;
            round.sum = 0.0;
            round.arrived = 0;
            round.generation = round.generation.wrapping_add(1);
            self.shared.completed.notify_all();
            return Ok(round.result);
        }

        // The next round cannot complete before this member joins it, so
        // `result` is still ours once the generation moves on.
        while round.generation == generation {
            round = self.shared.completed.wait(round).map_err(poisoned)?;
        }
        Ok(round.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn single_process_returns_input() {
        let context = DistributedContext::single_process();
        for value in [0.0, -3.25, 1e12, f64::MIN_POSITIVE] {
            assert_eq!(average_distributed_scalar(value, &context).unwrap(), value);
        }
    }

    #[test]
    fn distributed_rank_without_group_fails() {
        let context = DistributedContext::new(0, None);
        assert!(matches!(
            average_distributed_scalar(1.0, &context),
            Err(TrainingError::Runtime(_))
        ));
    }

    #[test]
    fn context_follows_configured_rank() {
        let mut runtime = RuntimeConfig::default();
        let context = DistributedContext::from_config(&runtime, None);
        assert!(!context.is_distributed());
        assert_eq!(average_distributed_scalar(4.0, &context).unwrap(), 4.0);

        runtime.local_rank = 0;
        let context = DistributedContext::from_config(&runtime, None);
        assert!(context.is_distributed());
        assert!(average_distributed_scalar(4.0, &context).is_err());

        let member = LocalProcessGroup::new(1).pop().unwrap();
        let context = DistributedContext::from_config(&runtime, Some(Arc::new(member)));
        assert_eq!(context.local_rank, 0);
        assert_eq!(average_distributed_scalar(4.0, &context).unwrap(), 4.0);
    }

    #[test]
    fn every_worker_receives_the_mean() {
        let members = LocalProcessGroup::new(4);
        let handles: Vec<_> = members
            .into_iter()
            .map(|member| {
                thread::spawn(move || {
                    let value = (member.rank() + 1) as f64;
                    let context = DistributedContext::with_group(Arc::new(member));
                    average_distributed_scalar(value, &context).unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 2.5);
        }
    }

    #[test]
    fn consecutive_rounds_do_not_mix() {
        let members = LocalProcessGroup::new(3);
        let handles: Vec<_> = members
            .into_iter()
            .map(|member| {
                thread::spawn(move || {
                    (0..50)
                        .map(|round| member.all_reduce_sum(round as f64).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let expected: Vec<f64> = (0..50).map(|round| 3.0 * round as f64).collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    }
}
