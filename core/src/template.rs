use crate::builders::{BuilderSnapshot, Builders};
use crate::entities::Simulation;
use crate::error::ValidationError;
use crate::tags::{TagValue, Tags};
use crate::task::Task;
use tracing::warn;

/// Lazy generator of simulations: a base task, a prototype simulation
/// carrying base tags, and a set of sweep builders.
///
/// Expansion is restartable; [`TemplatedSimulations::simulations`] returns a
/// fresh iterator over equivalent clones each call. Ids are assigned only
/// when a backend creates the simulations.
#[derive(Clone, Debug)]
pub struct TemplatedSimulations {
    base_simulation: Simulation,
    builders: Vec<Builders>,
}

impl TemplatedSimulations {
    pub fn new(base_task: Task) -> Self {
        Self {
            base_simulation: Simulation::new(base_task),
            builders: Vec::new(),
        }
    }

    pub fn from_task(base_task: Task, builder: impl Into<Builders>) -> Self {
        let mut template = Self::new(base_task);
        template.add_builder(builder);
        template
    }

    pub fn add_builder(&mut self, builder: impl Into<Builders>) -> &mut Self {
        self.builders.push(builder.into());
        self
    }

    /// Prototype every produced simulation is cloned from.
    pub fn base_simulation(&self) -> &Simulation {
        &self.base_simulation
    }

    pub fn base_simulation_mut(&mut self) -> &mut Simulation {
        &mut self.base_simulation
    }

    /// Tag stamped onto every produced simulation.
    pub fn set_base_tag(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        self.base_simulation.set_tag(key, value);
    }

    /// Total number of simulations the expansion will yield: the sum over
    /// builders, or one when no builders were attached (the bare prototype).
    pub fn count(&self) -> usize {
        if self.builders.is_empty() {
            1
        } else {
            self.builders.iter().map(Builders::count).sum()
        }
    }

    /// A fresh, lazy expansion pass.
    ///
    /// A builder that yields no elements contributes no simulations and only
    /// warns; a failing callback aborts the expansion with its error.
    pub fn simulations(
        &self,
    ) -> Box<dyn Iterator<Item = Result<Simulation, ValidationError>> + '_> {
        for (index, builder) in self.builders.iter().enumerate() {
            if builder.count() == 0 {
                warn!(builder = index, "Sweep builder produces no simulations");
            }
        }
        if self.builders.is_empty() {
            return Box::new(std::iter::once(Ok(self.base_simulation.clone())));
        }
        Box::new(
            self.builders
                .iter()
                .flat_map(|builder| builder.elements())
                .map(move |element| {
                    let mut simulation = self.base_simulation.clone();
                    for (callback, value) in element {
                        let tags: Tags = callback(&mut simulation, &value)?;
                        simulation.tags.extend(tags);
                    }
                    Ok(simulation)
                }),
        )
    }

    /// Eagerly expand, failing on the first callback error.
    pub fn realize(&self) -> Result<Vec<Simulation>, ValidationError> {
        self.simulations().collect()
    }

    pub fn builder_snapshots(&self) -> Vec<BuilderSnapshot> {
        self.builders.iter().map(Builders::snapshot).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::{set_parameter_sweep, SimulationBuilder};

    fn template_with_axes() -> TemplatedSimulations {
        let mut builder = SimulationBuilder::new();
        builder.add_sweep_definition(set_parameter_sweep("a"), 0..3i64);
        builder.add_sweep_definition(set_parameter_sweep("b"), [10i64, 20]);
        let mut template = TemplatedSimulations::from_task(Task::from_command("true"), builder);
        template.set_base_tag("campaign", "unit");
        template
    }

    #[test]
    fn expansion_merges_base_tags() {
        let template = template_with_axes();
        let sims = template.realize().unwrap();
        assert_eq!(sims.len(), 6);
        assert!(sims.iter().all(|s| s.tags["campaign"] == TagValue::from("unit")));
        assert!(sims.iter().all(|s| s.id.is_none()));
    }

    #[test]
    fn expansion_is_restartable_and_equivalent() {
        let template = template_with_axes();
        let first: Vec<Tags> = template.realize().unwrap().into_iter().map(|s| s.tags).collect();
        let second: Vec<Tags> = template.realize().unwrap().into_iter().map(|s| s.tags).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn count_matches_expansion() {
        let template = template_with_axes();
        assert_eq!(template.count(), template.realize().unwrap().len());
    }

    #[test]
    fn bare_template_yields_prototype() {
        let template = TemplatedSimulations::new(Task::from_command("true"));
        assert_eq!(template.count(), 1);
        assert_eq!(template.realize().unwrap().len(), 1);
    }

    #[test]
    fn failing_callback_aborts_expansion() {
        let mut builder = SimulationBuilder::new();
        builder.add_sweep_definition(
            |_sim: &mut Simulation, _value: &serde_json::Value| {
                Err(ValidationError::SweepCallback("boom".into()))
            },
            [1i64, 2],
        );
        let template = TemplatedSimulations::from_task(Task::from_command("true"), builder);
        assert!(template.realize().is_err());
    }

    #[test]
    fn empty_builder_produces_zero_simulations() {
        let builder = SimulationBuilder::new();
        let template = TemplatedSimulations::from_task(Task::from_command("true"), builder);
        assert_eq!(template.realize().unwrap().len(), 0);
    }
}
