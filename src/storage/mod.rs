pub mod experience_pool;

pub use experience_pool::{ExperiencePool, ExperiencePoolConfig, ExperienceSet, OverwriteType};
