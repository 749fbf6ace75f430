//! Campaign orchestration core: the entity model, sweep expansion, the
//! backend operations contract, the platform facade and the orchestration
//! engine. Concrete backends live in their own crates and plug in through
//! [`registry`].

pub mod assets;
pub mod builders;
pub mod config;
pub mod entities;
pub mod error;
pub mod filter;
pub mod ids;
pub mod mock;
pub mod ops;
pub mod orchestration;
pub mod platform;
pub mod registry;
pub mod status;
pub mod tags;
pub mod task;
pub mod template;

pub use assets::{Asset, AssetCollection};
pub use builders::{Arm, ArmBuilder, ArmType, Builders, SimulationBuilder};
pub use entities::{Experiment, Item, ItemKind, Simulation, Suite, WorkItem};
pub use error::{ConfigError, OrchestrationError, PlatformError, ValidationError};
pub use platform::{Platform, RetrievedFiles};
pub use status::EntityStatus;
pub use tags::{TagValue, Tags};
pub use task::{CommandLine, Task};
pub use template::TemplatedSimulations;
