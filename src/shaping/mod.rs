//! Translation between an environment's native events and the flat vectors agents learn from.
pub mod cim;

use std::collections::BTreeMap;

use anyhow::Result;

use crate::environment::Environment;
use crate::storage::ExperienceSet;

pub use cim::{
    CimActionShaper, CimStateShaper, ExperienceShapingConfig, StateShapingConfig,
    TruncatedExperienceShaper,
};

pub trait StateShaper<E: Environment> {
    /// Length of every shaped state.
    fn dim(&self) -> usize;

    fn shape(&self, event: &E::DecisionEvent, env: &E) -> Result<Vec<f32>>;
}

pub trait ActionShaper<E: Environment> {
    fn shape(&self, action_index: i64, event: &E::DecisionEvent, env: &E) -> Result<E::Action>;
}

/// One decision as seen by the agent that made it.
#[derive(Debug, Clone)]
pub struct TransitionRecord<D> {
    pub agent_id: String,
    pub state: Vec<f32>,
    pub action: i64,
    pub event: D,
}

pub trait ExperienceShaper<E: Environment> {
    fn record(&mut self, transition: TransitionRecord<E::DecisionEvent>);

    /// Turns every recorded decision into experiences grouped by agent and forgets them.
    fn shape(&mut self, env: &E) -> Result<BTreeMap<String, ExperienceSet>>;

    fn reset(&mut self);
}
