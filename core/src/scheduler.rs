//! Priority sort and candidate-model resolution into per-tick assignments
//! (§4.5)
//!
//! Stateless apart from its configuration: each tick reads ready tasks and
//! rate windows through `&mut Store`/`&RateCoordinator` and returns a fresh
//! `Vec<ScheduleDecision>` that the caller discards after consuming it
//! (§3: "the Scheduler owns the current tick's decision list and discards
//! it on the next tick" — here that just means nothing is cached between
//! calls).

use crate::rate_coordinator::RateCoordinator;
use crate::store::{ReadyTasksOrder, Store};
use shared::config::PriorityWeights;
use shared::error::Result;
use shared::model::{ScheduleDecision, Task, TaskCategory};
use std::collections::HashMap;
use tracing::debug;

/// Default estimated duration used when a task specifies none, so
/// `estimatedCompletion` is always computable.
const DEFAULT_ESTIMATED_DURATION_MS: u64 = 5_000;

pub struct Scheduler {
    routing: HashMap<TaskCategory, Vec<String>>,
    weights: PriorityWeights,
    max_concurrent: usize,
}

impl Scheduler {
    pub fn new(
        routing: HashMap<TaskCategory, Vec<String>>,
        weights: PriorityWeights,
        max_concurrent: usize,
    ) -> Self {
        Self {
            routing,
            weights,
            max_concurrent,
        }
    }

    fn candidates(&self, task: &Task) -> Vec<String> {
        let base = self.routing.get(&task.category).cloned().unwrap_or_default();
        let Some(preferred) = task.preferred_model.as_deref() else {
            return base;
        };
        let mut out = Vec::with_capacity(base.len() + 1);
        out.push(preferred.to_string());
        for candidate in base {
            if candidate != preferred {
                out.push(candidate);
            }
        }
        out
    }

    fn sort_ready(&self, tasks: &mut [Task]) {
        tasks.sort_by(|a, b| {
            let weight_a = self.weights.weight(a.priority);
            let weight_b = self.weights.weight(b.priority);
            weight_b
                .cmp(&weight_a)
                .then_with(|| match (a.deadline, b.deadline) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                })
                .then(a.created_at.cmp(&b.created_at))
        });
    }

    /// Resolves one task's best decision: the first candidate currently
    /// available wins with `scheduledFor=now`; otherwise the candidate with
    /// the earliest `getNextAvailable` is used with a future `scheduledFor`.
    /// Returns `None` only when the task has no candidate models at all.
    fn decide_one(
        &self,
        store: &mut Store,
        rate: &RateCoordinator,
        task: &Task,
        now: u64,
    ) -> Result<Option<ScheduleDecision>> {
        let candidates = self.candidates(task);
        if candidates.is_empty() {
            return Ok(None);
        }

        let mut best_future: Option<(String, u64)> = None;
        for model in &candidates {
            if rate.is_available(store, model, now)? {
                let estimated_completion =
                    now + task.estimated_duration.unwrap_or(DEFAULT_ESTIMATED_DURATION_MS);
                return Ok(Some(ScheduleDecision {
                    task_id: task.id.clone(),
                    model: model.clone(),
                    scheduled_for: now,
                    estimated_completion,
                }));
            }
            let next_available = rate.get_next_available(store, model, now)?;
            match &best_future {
                Some((_, best_at)) if *best_at <= next_available => {}
                _ => best_future = Some((model.clone(), next_available)),
            }
        }

        Ok(best_future.map(|(model, scheduled_for)| {
            let estimated_completion =
                scheduled_for + task.estimated_duration.unwrap_or(DEFAULT_ESTIMATED_DURATION_MS);
            ScheduleDecision {
                task_id: task.id.clone(),
                model,
                scheduled_for,
                estimated_completion,
            }
        }))
    }

    /// Produces the ordered list of decisions for one tick (§4.5). Decisions
    /// with `scheduledFor > now` do not consume an `availableSlot` (§9 open
    /// question, resolved here in favour of the documented counter
    /// behaviour: only immediately-schedulable decisions count against
    /// `maxConcurrent`).
    pub fn plan_schedule(
        &self,
        store: &mut Store,
        rate: &RateCoordinator,
        now: u64,
    ) -> Result<Vec<ScheduleDecision>> {
        let running = store.count_by_status()?.running as usize;
        let mut available_slots = self.max_concurrent.saturating_sub(running);

        let mut ready = store.get_ready_tasks(&ReadyTasksOrder::default())?;
        if available_slots == 0 || ready.is_empty() {
            return Ok(Vec::new());
        }
        self.sort_ready(&mut ready);

        let mut decisions = Vec::new();
        for task in &ready {
            if available_slots == 0 {
                break;
            }
            let Some(decision) = self.decide_one(store, rate, task, now)? else {
                continue;
            };
            if decision.is_immediately_schedulable(now) {
                available_slots -= 1;
            }
            decisions.push(decision);
        }

        debug!(count = decisions.len(), "scheduler tick produced decisions");
        Ok(decisions)
    }

    /// Recomputes a single task's decision, ignoring `availableSlots` (used
    /// by the executor after a failed `tryReserve` to requeue one task
    /// without recomputing the whole tick, §4.5 `reschedule`).
    pub fn reschedule(
        &self,
        store: &mut Store,
        rate: &RateCoordinator,
        task: &Task,
        now: u64,
    ) -> Result<Option<ScheduleDecision>> {
        self.decide_one(store, rate, task, now)
    }

    pub fn immediately_schedulable(decisions: &[ScheduleDecision], now: u64) -> Vec<ScheduleDecision> {
        decisions
            .iter()
            .filter(|d| d.is_immediately_schedulable(now))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_queue::TaskQueue;
    use shared::config::ModelConfig;
    use shared::model::{Priority, TaskCategory, TaskInput};

    fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::new(dir.path(), 5).unwrap();
        store.initialize().unwrap();
        (dir, store)
    }

    fn input(title: &str, priority: Priority) -> TaskInput {
        TaskInput {
            project_id: None,
            title: title.to_string(),
            prompt: "go".to_string(),
            category: Some(TaskCategory::Coding),
            priority,
            depends_on: vec![],
            preferred_model: None,
            deadline: None,
            estimated_duration: None,
            max_attempts: 3,
        }
    }

    fn routing() -> HashMap<TaskCategory, Vec<String>> {
        let mut routing = HashMap::new();
        routing.insert(TaskCategory::Coding, vec!["m1".to_string(), "m2".to_string()]);
        routing
    }

    #[test]
    fn priority_ordering_places_critical_before_earlier_low() {
        let (_dir, mut store) = test_store();
        let mut low = input("low", Priority::Low);
        low.priority = Priority::Low;
        let low_id = TaskQueue::add(&mut store, low).unwrap();
        let crit_id = TaskQueue::add(&mut store, input("crit", Priority::Critical)).unwrap();

        let rate = RateCoordinator::new(vec![ModelConfig {
            key: "m1".to_string(),
            max_requests: 10,
            window_duration_ms: 60_000,
            endpoint: None,
        }]);
        rate.seed_if_absent(&mut store, 0).unwrap();

        let scheduler = Scheduler::new(routing(), shared::config::PriorityWeights {
            critical: 1000,
            high: 100,
            medium: 10,
            low: 1,
        }, 10);

        let decisions = scheduler.plan_schedule(&mut store, &rate, 0).unwrap();
        assert_eq!(decisions[0].task_id, crit_id);
        assert_eq!(decisions[1].task_id, low_id);
    }

    #[test]
    fn exhausted_candidate_falls_through_to_next_model() {
        let (_dir, mut store) = test_store();
        let id = TaskQueue::add(&mut store, input("t", Priority::Medium)).unwrap();

        let rate = RateCoordinator::new(vec![
            ModelConfig { key: "m1".to_string(), max_requests: 0, window_duration_ms: 60_000, endpoint: None },
            ModelConfig { key: "m2".to_string(), max_requests: 10, window_duration_ms: 60_000, endpoint: None },
        ]);
        rate.seed_if_absent(&mut store, 0).unwrap();

        let scheduler = Scheduler::new(routing(), shared::config::PriorityWeights {
            critical: 1000, high: 100, medium: 10, low: 1,
        }, 10);

        let decisions = scheduler.plan_schedule(&mut store, &rate, 0).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].task_id, id);
        assert_eq!(decisions[0].model, "m2");
    }

    #[test]
    fn zero_available_slots_yields_empty_plan() {
        let (_dir, mut store) = test_store();
        TaskQueue::add(&mut store, input("t", Priority::Medium)).unwrap();

        let rate = RateCoordinator::new(vec![ModelConfig {
            key: "m1".to_string(), max_requests: 10, window_duration_ms: 60_000, endpoint: None,
        }]);
        rate.seed_if_absent(&mut store, 0).unwrap();

        let scheduler = Scheduler::new(routing(), shared::config::PriorityWeights {
            critical: 1000, high: 100, medium: 10, low: 1,
        }, 0);

        let decisions = scheduler.plan_schedule(&mut store, &rate, 0).unwrap();
        assert!(decisions.is_empty());
    }
}
