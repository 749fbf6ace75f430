//! Post-hoc selection of simulations by status and tags, resolved against a
//! platform rather than in-memory entities, so filters work on reloaded
//! campaigns too.

use crate::entities::{ItemKind, Simulation};
use crate::error::PlatformError;
use crate::platform::Platform;
use crate::status::EntityStatus;
use crate::tags::{TagValue, Tags};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One tag criterion: exact match or an arbitrary predicate over the value.
/// A simulation without the key never matches.
#[derive(Clone)]
pub enum TagFilter {
    Equals(String, TagValue),
    Predicate(String, Arc<dyn Fn(&TagValue) -> bool + Send + Sync>),
}

impl TagFilter {
    pub fn equals(key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        Self::Equals(key.into(), value.into())
    }

    pub fn predicate(
        key: impl Into<String>,
        predicate: impl Fn(&TagValue) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::Predicate(key.into(), Arc::new(predicate))
    }

    pub fn matches(&self, tags: &Tags) -> bool {
        match self {
            Self::Equals(key, expected) => {
                tags.get(key).is_some_and(|value| value.matches(expected))
            }
            Self::Predicate(key, predicate) => tags.get(key).is_some_and(|value| predicate(value)),
        }
    }
}

impl std::fmt::Debug for TagFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equals(key, value) => write!(f, "TagFilter::Equals({key:?}, {value:?})"),
            Self::Predicate(key, _) => write!(f, "TagFilter::Predicate({key:?}, ..)"),
        }
    }
}

/// Conjunction of criteria plus result shaping. All criteria must hold.
#[derive(Clone, Debug, Default)]
pub struct FilterSpec {
    pub status: Option<EntityStatus>,
    pub tags: Vec<TagFilter>,
    /// Stop after this many matches, in backend enumeration order.
    pub max_simulations: Option<usize>,
    /// Simulation ids excluded regardless of other criteria.
    pub skip_ids: BTreeSet<String>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: EntityStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.tags.push(TagFilter::equals(key, value));
        self
    }

    pub fn with_tag_predicate(
        mut self,
        key: impl Into<String>,
        predicate: impl Fn(&TagValue) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.tags.push(TagFilter::predicate(key, predicate));
        self
    }

    pub fn take(mut self, max_simulations: usize) -> Self {
        self.max_simulations = Some(max_simulations);
        self
    }

    pub fn skip_id(mut self, id: impl Into<String>) -> Self {
        self.skip_ids.insert(id.into());
        self
    }

    pub fn matches(&self, simulation: &Simulation) -> bool {
        if let Some(id) = simulation.id.as_deref() {
            if self.skip_ids.contains(id) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if simulation.status != status {
                return false;
            }
        }
        self.tags.iter().all(|filter| filter.matches(&simulation.tags))
    }

    fn select(&self, simulations: impl IntoIterator<Item = Simulation>) -> Vec<Simulation> {
        let matched = simulations.into_iter().filter(|sim| self.matches(sim));
        match self.max_simulations {
            Some(cap) => matched.take(cap).collect(),
            None => matched.collect(),
        }
    }
}

/// Simulations under an entity matching the filter. A suite is flattened
/// through its experiments; a simulation id selects at most itself.
pub fn filter_simulations(
    platform: &Platform,
    kind: ItemKind,
    id: &str,
    spec: &FilterSpec,
) -> Result<Vec<Simulation>, PlatformError> {
    let ops = platform.backend().simulations();
    let mut simulations = Vec::new();
    for sim_id in platform.flatten_item(kind, id)? {
        let raw = ops.get(&sim_id)?;
        simulations.push(ops.to_entity(&raw)?);
    }
    Ok(spec.select(simulations))
}

pub fn filter_simulation_ids(
    platform: &Platform,
    kind: ItemKind,
    id: &str,
    spec: &FilterSpec,
) -> Result<Vec<String>, PlatformError> {
    Ok(filter_simulations(platform, kind, id, spec)?
        .into_iter()
        .filter_map(|sim| sim.id)
        .collect())
}

/// Matching simulations of a suite, grouped by experiment id. The cap
/// applies per experiment.
pub fn filter_suite_grouped(
    platform: &Platform,
    suite_id: &str,
    spec: &FilterSpec,
) -> Result<BTreeMap<String, Vec<Simulation>>, PlatformError> {
    let suite = platform.get_suite_with_experiments(suite_id)?;
    let mut grouped = BTreeMap::new();
    for experiment in suite.experiments {
        let Some(experiment_id) = experiment.id.clone() else {
            continue;
        };
        let selected = spec.select(experiment.simulations().to_vec());
        grouped.insert(experiment_id, selected);
    }
    Ok(grouped)
}
