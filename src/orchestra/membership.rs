use std::{cmp::Ordering, collections::HashSet, fmt, str::FromStr};

use log::{info, warn};

use crate::orchestra::{
    registry::{MembershipState, WorkerRegistry},
    reputation::Contributions,
    worker::WorkerId,
};

/// The smallest active population any policy may leave behind.
pub const ACTIVE_FLOOR: usize = 2;

/// How workers with a low contribution score are dealt with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Methodology {
    /// Eliminates the single lowest scored worker.
    DeleteOne,
    /// Eliminates low scored workers, lowest first, until the floor or the threshold stops it.
    DeleteBatch,
    /// Moves low scored workers aside and brings back the ones that scored well again.
    SetAside,
    /// A label no policy answers to, it never changes anything.
    Unrecognized(String),
}

impl FromStr for Methodology {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let methodology = match s {
            "delete-one" | "delete_one" => Self::DeleteOne,
            "delete-batch" | "delete_batch" | "delete" => Self::DeleteBatch,
            "set-aside" | "set_aside" => Self::SetAside,
            other => Self::Unrecognized(other.to_string()),
        };

        Ok(methodology)
    }
}

impl fmt::Display for Methodology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeleteOne => f.write_str("delete-one"),
            Self::DeleteBatch => f.write_str("delete-batch"),
            Self::SetAside => f.write_str("set-aside"),
            Self::Unrecognized(label) => f.write_str(label),
        }
    }
}

/// A scored worker as the policy sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: WorkerId,
    pub score: f64,
    pub state: MembershipState,
    /// The worker's position in the registry's enumeration order, breaks score ties.
    pub rank: usize,
}

/// A single registry change decided by the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Eliminate(WorkerId),
    SetAside(WorkerId),
    Reinstate(WorkerId),
}

/// What applying the policy did to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipChange {
    pub mutated: bool,
    pub active: usize,
    pub mutations: Vec<Mutation>,
}

/// Decides which workers leave, step aside or come back given their scores.
#[derive(Debug, Clone)]
pub struct MembershipPolicy {
    methodology: Methodology,
    threshold: f64,
}

impl MembershipPolicy {
    /// Creates a new `MembershipPolicy`.
    ///
    /// # Arguments
    /// * `methodology` - Which policy to apply.
    /// * `threshold` - The score below which a worker is considered a poor contributor.
    pub fn new(methodology: Methodology, threshold: f64) -> Self {
        Self {
            methodology,
            threshold,
        }
    }

    pub fn methodology(&self) -> &Methodology {
        &self.methodology
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Applies the policy to the registry.
    ///
    /// # Arguments
    /// * `registry` - The registry to mutate.
    /// * `scores` - This round's contribution scores.
    ///
    /// # Returns
    /// Whether the registry changed and the resulting active count.
    pub fn eliminate(&self, registry: &WorkerRegistry, scores: &Contributions) -> MembershipChange {
        let candidates: Vec<_> = scores
            .iter()
            .filter_map(|(worker, score)| {
                let id = worker.id().clone();
                let state = registry.state(&id)?;
                let rank = registry.rank(&id)?;
                Some(Candidate {
                    id,
                    score,
                    state,
                    rank,
                })
            })
            .collect();

        let mutations = self.decide(&candidates, registry.num_available());

        for mutation in &mutations {
            let active = match mutation {
                Mutation::Eliminate(id) => registry.eliminate(id),
                Mutation::SetAside(id) => registry.set_aside(id),
                Mutation::Reinstate(id) => registry.reregister(id),
            };

            info!("{mutation:?}, {active} active worker(s) left");
        }

        MembershipChange {
            mutated: !mutations.is_empty(),
            active: registry.num_available(),
            mutations,
        }
    }

    /// Decides the registry mutations for a set of scored workers without applying them.
    ///
    /// # Arguments
    /// * `candidates` - The scored workers.
    /// * `active` - The current amount of active workers.
    ///
    /// # Returns
    /// The mutations to apply, in order.
    pub fn decide(&self, candidates: &[Candidate], active: usize) -> Vec<Mutation> {
        let mut sorted: Vec<_> = candidates
            .iter()
            .filter(|c| {
                matches!(
                    c.state,
                    MembershipState::Active | MembershipState::Waiting | MembershipState::SetAside
                )
            })
            .collect();

        sorted.sort_by(|a, b| match a.score.total_cmp(&b.score) {
            Ordering::Equal => a.rank.cmp(&b.rank),
            ord => ord,
        });

        match &self.methodology {
            Methodology::DeleteOne => self.delete_one(&sorted, active),
            Methodology::DeleteBatch => self.delete_batch(&sorted, active),
            Methodology::SetAside => self.set_aside(&sorted, active),
            Methodology::Unrecognized(label) => {
                warn!("unrecognized methodology {label:?}, membership left unchanged");
                Vec::new()
            }
        }
    }

    fn delete_one(&self, sorted: &[&Candidate], active: usize) -> Vec<Mutation> {
        let Some(lowest) = sorted.first() else {
            return Vec::new();
        };

        let left = match lowest.state {
            MembershipState::Active => active.saturating_sub(1),
            _ => active,
        };

        if sorted.len() > ACTIVE_FLOOR && lowest.score < self.threshold && left >= ACTIVE_FLOOR {
            vec![Mutation::Eliminate(lowest.id.clone())]
        } else {
            Vec::new()
        }
    }

    fn delete_batch(&self, sorted: &[&Candidate], mut active: usize) -> Vec<Mutation> {
        let mut mutations = Vec::new();

        for candidate in sorted {
            if active <= ACTIVE_FLOOR || candidate.score >= self.threshold {
                break;
            }

            if candidate.state == MembershipState::Active {
                active -= 1;
            }

            mutations.push(Mutation::Eliminate(candidate.id.clone()));
        }

        mutations
    }

    fn set_aside(&self, sorted: &[&Candidate], mut active: usize) -> Vec<Mutation> {
        let mut mutations = Vec::new();
        let mut reinstated = HashSet::new();

        for candidate in sorted {
            let benched = matches!(
                candidate.state,
                MembershipState::Waiting | MembershipState::SetAside
            );

            if benched && candidate.score > self.threshold {
                reinstated.insert(&candidate.id);
                mutations.push(Mutation::Reinstate(candidate.id.clone()));
                active += 1;
            }
        }

        for candidate in sorted {
            if active <= ACTIVE_FLOOR {
                break;
            }

            let demote = candidate.state == MembershipState::Active
                && !reinstated.contains(&candidate.id)
                && candidate.score < self.threshold;

            if demote {
                mutations.push(Mutation::SetAside(candidate.id.clone()));
                active -= 1;
            }
        }

        mutations
    }
}
