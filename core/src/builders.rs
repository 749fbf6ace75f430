use crate::entities::Simulation;
use crate::error::ValidationError;
use crate::tags::Tags;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Value swept along one axis. Kept as JSON so axes can mix scalars with
/// structured parameter fragments.
pub type SweepValue = serde_json::Value;

/// A sweep callback mutates a simulation for one axis value and returns the
/// tag delta to merge into the simulation's tags.
pub type SweepCallback =
    Arc<dyn Fn(&mut Simulation, &SweepValue) -> Result<Tags, ValidationError> + Send + Sync>;

/// One expansion element: every axis callback bound to its value.
pub type SweepElement = Vec<(SweepCallback, SweepValue)>;

/// A named axis: a callback plus the finite list of values to sweep.
#[derive(Clone)]
pub struct SweepAxis {
    callback: SweepCallback,
    values: Vec<SweepValue>,
}

impl SweepAxis {
    pub fn new<F, I, V>(callback: F, values: I) -> Self
    where
        F: Fn(&mut Simulation, &SweepValue) -> Result<Tags, ValidationError>
            + Send
            + Sync
            + 'static,
        I: IntoIterator<Item = V>,
        V: Into<SweepValue>,
    {
        Self {
            callback: Arc::new(callback),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn bound(&self) -> impl Iterator<Item = (SweepCallback, SweepValue)> + Clone + '_ {
        self.values
            .iter()
            .map(move |value| (self.callback.clone(), value.clone()))
    }

    fn snapshot(&self) -> SweepAxisSnapshot {
        SweepAxisSnapshot {
            values: self.values.clone(),
        }
    }
}

impl std::fmt::Debug for SweepAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepAxis")
            .field("values", &self.values)
            .finish()
    }
}

/// Cartesian-product sweep builder: each added definition is a new axis and
/// the expansion is the cross product of all axes, in declaration order.
#[derive(Clone, Debug, Default)]
pub struct SimulationBuilder {
    sweeps: Vec<SweepAxis>,
}

impl SimulationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sweep_definition<F, I, V>(&mut self, callback: F, values: I) -> &mut Self
    where
        F: Fn(&mut Simulation, &SweepValue) -> Result<Tags, ValidationError>
            + Send
            + Sync
            + 'static,
        I: IntoIterator<Item = V>,
        V: Into<SweepValue>,
    {
        self.sweeps.push(SweepAxis::new(callback, values));
        self
    }

    /// Number of elements the expansion will yield. Zero when no axes were
    /// declared or any axis is empty.
    pub fn count(&self) -> usize {
        if self.sweeps.is_empty() {
            0
        } else {
            self.sweeps.iter().map(SweepAxis::len).product()
        }
    }

    pub fn elements(&self) -> Box<dyn Iterator<Item = SweepElement> + '_> {
        if self.sweeps.is_empty() {
            return Box::new(std::iter::empty());
        }
        Box::new(
            self.sweeps
                .iter()
                .map(|axis| axis.bound())
                .multi_cartesian_product(),
        )
    }

    fn axis_snapshots(&self) -> Vec<SweepAxisSnapshot> {
        self.sweeps.iter().map(SweepAxis::snapshot).collect()
    }
}

/// How the axes inside one arm combine.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArmType {
    /// Cartesian product of the arm's axes.
    Cross,
    /// Element-wise zip; shorter axes repeat their last value to reach the
    /// longest axis length.
    Pair,
}

/// One axis-combination block inside an [`ArmBuilder`].
#[derive(Clone, Debug)]
pub struct Arm {
    kind: ArmType,
    axes: Vec<SweepAxis>,
}

impl Arm {
    pub fn cross() -> Self {
        Self {
            kind: ArmType::Cross,
            axes: Vec::new(),
        }
    }

    pub fn pair() -> Self {
        Self {
            kind: ArmType::Pair,
            axes: Vec::new(),
        }
    }

    pub fn kind(&self) -> ArmType {
        self.kind
    }

    pub fn add_sweep_definition<F, I, V>(&mut self, callback: F, values: I) -> &mut Self
    where
        F: Fn(&mut Simulation, &SweepValue) -> Result<Tags, ValidationError>
            + Send
            + Sync
            + 'static,
        I: IntoIterator<Item = V>,
        V: Into<SweepValue>,
    {
        self.axes.push(SweepAxis::new(callback, values));
        self
    }

    pub fn count(&self) -> usize {
        if self.axes.is_empty() || self.axes.iter().any(SweepAxis::is_empty) {
            return 0;
        }
        match self.kind {
            ArmType::Cross => self.axes.iter().map(SweepAxis::len).product(),
            ArmType::Pair => self.axes.iter().map(SweepAxis::len).max().unwrap_or(0),
        }
    }

    pub fn elements(&self) -> Box<dyn Iterator<Item = SweepElement> + '_> {
        if self.axes.is_empty() || self.axes.iter().any(SweepAxis::is_empty) {
            return Box::new(std::iter::empty());
        }
        match self.kind {
            ArmType::Cross => Box::new(
                self.axes
                    .iter()
                    .map(|axis| axis.bound())
                    .multi_cartesian_product(),
            ),
            ArmType::Pair => {
                let longest = self.axes.iter().map(SweepAxis::len).max().unwrap_or(0);
                Box::new((0..longest).map(move |index| {
                    self.axes
                        .iter()
                        .map(|axis| {
                            let clamped = index.min(axis.len() - 1);
                            (axis.callback.clone(), axis.values[clamped].clone())
                        })
                        .collect()
                }))
            }
        }
    }

    fn snapshot(&self) -> ArmSnapshot {
        ArmSnapshot {
            kind: self.kind,
            axes: self.axes.iter().map(SweepAxis::snapshot).collect(),
        }
    }
}

/// A collection of arms; the expansion is the concatenation of each arm's
/// expansion in insertion order.
#[derive(Clone, Debug, Default)]
pub struct ArmBuilder {
    arms: Vec<Arm>,
}

impl ArmBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_arm(&mut self, arm: Arm) -> &mut Self {
        self.arms.push(arm);
        self
    }

    pub fn count(&self) -> usize {
        self.arms.iter().map(Arm::count).sum()
    }

    pub fn elements(&self) -> Box<dyn Iterator<Item = SweepElement> + '_> {
        Box::new(self.arms.iter().flat_map(|arm| arm.elements()))
    }
}

/// All sweep builder variants understood by a templated simulation.
#[derive(Clone, Debug)]
pub enum Builders {
    Simulation(SimulationBuilder),
    Arm(ArmBuilder),
}

impl Builders {
    pub fn count(&self) -> usize {
        match self {
            Self::Simulation(builder) => builder.count(),
            Self::Arm(builder) => builder.count(),
        }
    }

    pub fn elements(&self) -> Box<dyn Iterator<Item = SweepElement> + '_> {
        match self {
            Self::Simulation(builder) => builder.elements(),
            Self::Arm(builder) => builder.elements(),
        }
    }

    pub fn snapshot(&self) -> BuilderSnapshot {
        match self {
            Self::Simulation(builder) => BuilderSnapshot::Cartesian {
                axes: builder.axis_snapshots(),
            },
            Self::Arm(builder) => BuilderSnapshot::Arms {
                arms: builder.arms.iter().map(Arm::snapshot).collect(),
            },
        }
    }
}

impl From<SimulationBuilder> for Builders {
    fn from(builder: SimulationBuilder) -> Self {
        Self::Simulation(builder)
    }
}

impl From<ArmBuilder> for Builders {
    fn from(builder: ArmBuilder) -> Self {
        Self::Arm(builder)
    }
}

/// Serializable record of one axis's declared values.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct SweepAxisSnapshot {
    pub values: Vec<SweepValue>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ArmSnapshot {
    pub kind: ArmType,
    pub axes: Vec<SweepAxisSnapshot>,
}

/// Serializable record of a builder's declared sweeps; callbacks do not
/// survive serialization, values do.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "builder", rename_all = "snake_case")]
pub enum BuilderSnapshot {
    Cartesian { axes: Vec<SweepAxisSnapshot> },
    Arms { arms: Vec<ArmSnapshot> },
}

/// Convenience: a callback that sets one named task parameter and tags the
/// simulation with it, the overwhelmingly common sweep body.
pub fn set_parameter_sweep(
    parameter: &str,
) -> impl Fn(&mut Simulation, &SweepValue) -> Result<Tags, ValidationError> + Send + Sync + 'static
{
    let parameter = parameter.to_owned();
    move |simulation, value| Ok(simulation.task.set_parameter(parameter.clone(), value.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    fn apply_all(elements: Box<dyn Iterator<Item = SweepElement> + '_>) -> Vec<Simulation> {
        elements
            .map(|element| {
                let mut sim = Simulation::new(Task::from_command("true"));
                for (callback, value) in element {
                    let tags = callback(&mut sim, &value).unwrap();
                    sim.tags.extend(tags);
                }
                sim
            })
            .collect()
    }

    #[test]
    fn cartesian_count_and_tags() {
        let mut builder = SimulationBuilder::new();
        builder.add_sweep_definition(set_parameter_sweep("a"), 0..3i64);
        builder.add_sweep_definition(set_parameter_sweep("b"), [10i64, 20]);
        assert_eq!(builder.count(), 6);

        let sims = apply_all(builder.elements());
        assert_eq!(sims.len(), 6);
        let pairs: Vec<(i64, i64)> = sims
            .iter()
            .map(|s| {
                (
                    s.tags["a"].as_i64().unwrap(),
                    s.tags["b"].as_i64().unwrap(),
                )
            })
            .collect();
        for expected in [(0, 10), (0, 20), (1, 10), (1, 20), (2, 10), (2, 20)] {
            assert!(pairs.contains(&expected), "missing {expected:?}");
        }
    }

    #[test]
    fn empty_axis_yields_nothing() {
        let mut builder = SimulationBuilder::new();
        builder.add_sweep_definition(set_parameter_sweep("a"), Vec::<i64>::new());
        builder.add_sweep_definition(set_parameter_sweep("b"), [1i64, 2]);
        assert_eq!(builder.count(), 0);
        assert_eq!(builder.elements().count(), 0);
    }

    #[test]
    fn builder_without_axes_yields_nothing() {
        let builder = SimulationBuilder::new();
        assert_eq!(builder.count(), 0);
        assert_eq!(builder.elements().count(), 0);
    }

    #[test]
    fn expansion_is_restartable() {
        let mut builder = SimulationBuilder::new();
        builder.add_sweep_definition(set_parameter_sweep("a"), 0..4i64);
        assert_eq!(builder.elements().count(), 4);
        assert_eq!(builder.elements().count(), 4);
    }

    #[test]
    fn pair_arm_zips_to_longest() {
        let mut arm = Arm::pair();
        arm.add_sweep_definition(set_parameter_sweep("a"), 0..5i64);
        arm.add_sweep_definition(set_parameter_sweep("b"), [1i64, 2, 3]);
        assert_eq!(arm.count(), 5);

        let sims = apply_all(arm.elements());
        let pairs: Vec<(i64, i64)> = sims
            .iter()
            .map(|s| {
                (
                    s.tags["a"].as_i64().unwrap(),
                    s.tags["b"].as_i64().unwrap(),
                )
            })
            .collect();
        // shorter axis repeats its last value
        assert_eq!(pairs, vec![(0, 1), (1, 2), (2, 3), (3, 3), (4, 3)]);
    }

    #[test]
    fn pair_arm_pads_single_value() {
        let mut arm = Arm::pair();
        arm.add_sweep_definition(set_parameter_sweep("a"), [1i64, 2, 3]);
        arm.add_sweep_definition(set_parameter_sweep("b"), [9i64]);
        assert_eq!(arm.count(), 3);
        let sims = apply_all(arm.elements());
        assert!(sims.iter().all(|s| s.tags["b"].as_i64() == Some(9)));
    }

    #[test]
    fn arm_builder_concatenates_arms() {
        let mut cross = Arm::cross();
        cross.add_sweep_definition(set_parameter_sweep("enable"), [false]);
        cross.add_sweep_definition(set_parameter_sweep("pop"), [500i64, 1000]);
        cross.add_sweep_definition(set_parameter_sweep("susc"), [0.5f64, 0.9]);

        let mut rates = Arm::cross();
        rates.add_sweep_definition(set_parameter_sweep("enable"), [true]);
        rates.add_sweep_definition(set_parameter_sweep("pop"), [500i64, 1000]);
        rates.add_sweep_definition(set_parameter_sweep("susc"), [0.5f64, 0.9]);
        rates.add_sweep_definition(set_parameter_sweep("rate"), [0.01f64, 0.1]);

        let mut builder = ArmBuilder::new();
        builder.add_arm(cross).add_arm(rates);
        assert_eq!(builder.count(), 12);

        let sims = apply_all(builder.elements());
        let without_rate = sims.iter().filter(|s| !s.tags.contains_key("rate")).count();
        assert_eq!(without_rate, 4);
        assert_eq!(sims.len() - without_rate, 8);
    }

    #[test]
    fn snapshot_keeps_axis_values() {
        let mut builder = SimulationBuilder::new();
        builder.add_sweep_definition(set_parameter_sweep("a"), [1i64, 2]);
        let snapshot = Builders::from(builder).snapshot();
        match snapshot {
            BuilderSnapshot::Cartesian { axes } => {
                assert_eq!(axes.len(), 1);
                assert_eq!(axes[0].values, vec![serde_json::json!(1), serde_json::json!(2)]);
            }
            other => panic!("unexpected snapshot {other:?}"),
        }
    }
}
