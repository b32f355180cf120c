//! Domain model: identifiers, priority tiers, tissue volumes.

pub mod ids;
pub mod priority;
pub mod volumes;

pub use ids::TaskId;
pub use priority::{ParsePriorityError, Priority};
pub use volumes::VolumetricResult;
