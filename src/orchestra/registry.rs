use std::{collections::HashMap, time::Duration};

use log::{debug, warn};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tokio::{sync::watch, time};

use crate::orchestra::worker::{WorkerHandle, WorkerId};

/// Where a worker stands in the campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MembershipState {
    /// Selected for rounds and counted in the active quota.
    Active,
    /// Connected but not admitted into the active population yet.
    Waiting,
    /// Demoted by the set-aside policy, may be reinstated later.
    SetAside,
    /// Permanently removed from the campaign.
    Eliminated,
    /// The worker that computes contribution scores.
    Coordinator,
}

struct Entry {
    worker: WorkerHandle,
    state: MembershipState,
}

/// The single source of truth for worker identity and membership.
///
/// Reads may happen at any time. Writes are expected to happen only at round
/// boundaries, the orchestrator never mutates it while a batch is in flight.
pub struct WorkerRegistry {
    entries: RwLock<Vec<Entry>>,
    connected: watch::Sender<usize>,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRegistry {
    /// Creates a new empty `WorkerRegistry`.
    pub fn new() -> Self {
        let (connected, _) = watch::channel(0);

        Self {
            entries: RwLock::new(Vec::new()),
            connected,
        }
    }

    /// Registers a newly connected worker as waiting.
    ///
    /// # Arguments
    /// * `worker` - The worker to register.
    ///
    /// # Returns
    /// False if a worker with the same id is already registered.
    pub fn register(&self, worker: WorkerHandle) -> bool {
        let mut entries = self.entries.write();

        if entries.iter().any(|e| e.worker.id() == worker.id()) {
            warn!(worker_id = worker.id().as_str(); "worker is already registered");
            return false;
        }

        debug!(worker_id = worker.id().as_str(); "registered worker");
        entries.push(Entry {
            worker,
            state: MembershipState::Waiting,
        });

        self.publish(&entries);
        true
    }

    /// Removes a worker entirely, usually after its connection dropped.
    ///
    /// # Returns
    /// The removed worker, if it was registered.
    pub fn unregister(&self, id: &WorkerId) -> Option<WorkerHandle> {
        let mut entries = self.entries.write();
        let pos = entries.iter().position(|e| e.worker.id() == id)?;
        let entry = entries.remove(pos);

        self.publish(&entries);
        Some(entry.worker)
    }

    /// Waits until at least `num` connected workers are registered.
    ///
    /// # Arguments
    /// * `num` - The amount of workers to wait for.
    /// * `timeout` - How long to wait at most.
    ///
    /// # Returns
    /// Whether the amount was reached before the timeout.
    pub async fn wait_for(&self, num: usize, timeout: Duration) -> bool {
        let mut rx = self.connected.subscribe();
        let reached = time::timeout(timeout, rx.wait_for(|&count| count >= num)).await;
        matches!(reached, Ok(Ok(_)))
    }

    /// Randomly samples active workers.
    ///
    /// # Arguments
    /// * `min` - The minimum amount of active workers needed to sample at all.
    /// * `max` - The maximum amount of workers to return.
    ///
    /// # Returns
    /// Up to `max` active workers, or none if fewer than `min` are active.
    pub fn sample(&self, min: usize, max: usize) -> Vec<WorkerHandle> {
        self.sample_in(MembershipState::Active, min, max)
    }

    /// Randomly samples workers that haven't been admitted yet.
    ///
    /// # Arguments
    /// * `min` - The minimum amount of waiting workers needed to sample at all.
    /// * `max` - The maximum amount of workers to return.
    ///
    /// # Returns
    /// Up to `max` waiting workers, or none if fewer than `min` are waiting.
    pub fn sample_waiting(&self, min: usize, max: usize) -> Vec<WorkerHandle> {
        self.sample_in(MembershipState::Waiting, min, max)
    }

    fn sample_in(&self, state: MembershipState, min: usize, max: usize) -> Vec<WorkerHandle> {
        let mut pool = self.in_state(|s| s == state);

        if pool.len() < min {
            debug!(
                "cannot sample {min} workers, only {} are {state:?}",
                pool.len()
            );
            return Vec::new();
        }

        pool.shuffle(&mut rand::rng());
        pool.truncate(max);
        pool
    }

    /// Returns every registered worker, keyed by id.
    pub fn all(&self) -> HashMap<WorkerId, WorkerHandle> {
        self.entries
            .read()
            .iter()
            .map(|e| (e.worker.id().clone(), e.worker.clone()))
            .collect()
    }

    /// The amount of active workers.
    pub fn num_available(&self) -> usize {
        self.count(MembershipState::Active)
    }

    /// The active workers, in registration order.
    pub fn active(&self) -> Vec<WorkerHandle> {
        self.in_state(|s| s == MembershipState::Active)
    }

    /// The workers that are neither active nor out of the campaign, in registration order.
    pub fn waiting(&self) -> Vec<WorkerHandle> {
        self.in_state(|s| matches!(s, MembershipState::Waiting | MembershipState::SetAside))
    }

    /// The membership state of a worker, if it's registered.
    pub fn state(&self, id: &WorkerId) -> Option<MembershipState> {
        self.entries
            .read()
            .iter()
            .find(|e| e.worker.id() == id)
            .map(|e| e.state)
    }

    /// The position of a worker in the registry's enumeration order.
    pub fn rank(&self, id: &WorkerId) -> Option<usize> {
        self.entries.read().iter().position(|e| e.worker.id() == id)
    }

    /// Permanently removes a worker from the campaign.
    ///
    /// # Returns
    /// The amount of active workers left.
    pub fn eliminate(&self, id: &WorkerId) -> usize {
        use MembershipState::*;
        self.transition(id, &[Active, Waiting, SetAside], Eliminated)
    }

    /// Admits a waiting or set aside worker into the active population.
    ///
    /// # Returns
    /// The amount of active workers after the change.
    pub fn reregister(&self, id: &WorkerId) -> usize {
        use MembershipState::*;
        self.transition(id, &[Waiting, SetAside], Active)
    }

    /// Moves an active worker out of the active population without removing it.
    ///
    /// # Returns
    /// The amount of active workers left.
    pub fn set_aside(&self, id: &WorkerId) -> usize {
        use MembershipState::*;
        self.transition(id, &[Active], SetAside)
    }

    /// Marks a worker as the campaign's coordinator, registering it if needed.
    ///
    /// # Returns
    /// False if a different coordinator is already registered.
    pub fn register_coordinator(&self, worker: WorkerHandle) -> bool {
        let mut entries = self.entries.write();

        let taken = entries
            .iter()
            .any(|e| e.state == MembershipState::Coordinator && e.worker.id() != worker.id());

        if taken {
            warn!(worker_id = worker.id().as_str(); "a coordinator is already registered");
            return false;
        }

        match entries.iter_mut().find(|e| e.worker.id() == worker.id()) {
            Some(entry) => entry.state = MembershipState::Coordinator,
            None => entries.push(Entry {
                worker,
                state: MembershipState::Coordinator,
            }),
        }

        self.publish(&entries);
        true
    }

    /// The coordinator, once one has been registered.
    pub fn coordinator(&self) -> Option<WorkerHandle> {
        self.in_state(|s| s == MembershipState::Coordinator)
            .into_iter()
            .next()
    }

    fn transition(&self, id: &WorkerId, from: &[MembershipState], to: MembershipState) -> usize {
        let mut entries = self.entries.write();

        match entries.iter_mut().find(|e| e.worker.id() == id) {
            Some(entry) if from.contains(&entry.state) => {
                debug!(worker_id = id.as_str(); "{:?} -> {to:?}", entry.state);
                entry.state = to;
            }
            Some(entry) => {
                warn!(worker_id = id.as_str(); "ignoring {:?} -> {to:?}", entry.state);
            }
            None => warn!(worker_id = id.as_str(); "ignoring transition of unknown worker"),
        }

        self.publish(&entries);
        Self::count_in(&entries, MembershipState::Active)
    }

    fn in_state(&self, pred: impl Fn(MembershipState) -> bool) -> Vec<WorkerHandle> {
        self.entries
            .read()
            .iter()
            .filter(|e| pred(e.state))
            .map(|e| e.worker.clone())
            .collect()
    }

    fn count(&self, state: MembershipState) -> usize {
        Self::count_in(&self.entries.read(), state)
    }

    fn count_in(entries: &[Entry], state: MembershipState) -> usize {
        entries.iter().filter(|e| e.state == state).count()
    }

    fn publish(&self, entries: &[Entry]) {
        let connected = entries
            .iter()
            .filter(|e| e.state != MembershipState::Eliminated)
            .count();

        self.connected.send_replace(connected);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::orchestra::testing::FakeWorker;

    fn registry_with(ids: &[&str]) -> WorkerRegistry {
        let registry = WorkerRegistry::new();
        for id in ids {
            registry.register(Arc::new(FakeWorker::new(*id)));
        }
        registry
    }

    #[test]
    fn test_registered_workers_start_waiting() {
        let registry = registry_with(&["a", "b"]);

        assert_eq!(registry.num_available(), 0);
        assert_eq!(registry.waiting().len(), 2);
        assert_eq!(registry.state(&"a".into()), Some(MembershipState::Waiting));
    }

    #[test]
    fn test_duplicate_registration_is_refused() {
        let registry = registry_with(&["a"]);
        assert!(!registry.register(Arc::new(FakeWorker::new("a"))));
        assert_eq!(registry.all().len(), 1);
    }

    #[test]
    fn test_transitions_report_active_count() {
        let registry = registry_with(&["a", "b", "c"]);

        assert_eq!(registry.reregister(&"a".into()), 1);
        assert_eq!(registry.reregister(&"b".into()), 2);
        assert_eq!(registry.reregister(&"c".into()), 3);
        assert_eq!(registry.set_aside(&"b".into()), 2);
        assert_eq!(registry.eliminate(&"c".into()), 1);
        assert_eq!(registry.reregister(&"b".into()), 2);
        assert_eq!(registry.num_available(), 2);
        assert_eq!(registry.state(&"c".into()), Some(MembershipState::Eliminated));
    }

    #[test]
    fn test_eliminated_worker_cannot_come_back() {
        let registry = registry_with(&["a"]);
        registry.eliminate(&"a".into());

        assert_eq!(registry.reregister(&"a".into()), 0);
        assert_eq!(registry.state(&"a".into()), Some(MembershipState::Eliminated));
    }

    #[test]
    fn test_sample_respects_min_and_max() {
        let registry = registry_with(&["a", "b", "c", "d"]);
        for id in ["a", "b", "c"] {
            registry.reregister(&id.into());
        }

        assert!(registry.sample(4, 4).is_empty());
        assert_eq!(registry.sample(2, 2).len(), 2);
        assert_eq!(registry.sample(1, 10).len(), 3);
        assert_eq!(registry.sample_waiting(1, 10).len(), 1);
    }

    #[test]
    fn test_single_coordinator() {
        let registry = registry_with(&["a", "b"]);
        let a = registry.all()[&WorkerId::from("a")].clone();
        let b = registry.all()[&WorkerId::from("b")].clone();

        assert!(registry.register_coordinator(a));
        assert!(!registry.register_coordinator(b));
        assert_eq!(registry.coordinator().unwrap().id().as_str(), "a");
        assert_eq!(registry.eliminate(&"a".into()), 0);
        assert_eq!(registry.state(&"a".into()), Some(MembershipState::Coordinator));
    }

    #[test]
    fn test_rank_follows_registration_order() {
        let registry = registry_with(&["z", "a", "m"]);
        assert_eq!(registry.rank(&"z".into()), Some(0));
        assert_eq!(registry.rank(&"m".into()), Some(2));

        registry.unregister(&"z".into());
        assert_eq!(registry.rank(&"a".into()), Some(0));
        assert_eq!(registry.rank(&"z".into()), None);
    }

    #[tokio::test]
    async fn test_wait_for_sees_late_registrations() {
        let registry = Arc::new(WorkerRegistry::new());
        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait_for(2, Duration::from_secs(5)).await })
        };

        registry.register(Arc::new(FakeWorker::new("a")));
        registry.register(Arc::new(FakeWorker::new("b")));

        assert!(waiter.await.unwrap());
        assert!(!registry.wait_for(3, Duration::from_millis(20)).await);
    }
}
