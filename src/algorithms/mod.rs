pub mod dqn;

use anyhow::Result;

use crate::networks::LearningModel;

pub use dqn::{Dqn, DqnHyperParams, OptimizerParams};

/// Uniform policy interface over the model(s) an algorithm trains.
pub trait Algorithm {
    /// Algorithm-specific training input, e.g. a batch of transitions for DQN.
    type Batch;
    type Output;

    fn model(&self) -> &LearningModel;

    fn model_mut(&mut self) -> &mut LearningModel;

    /// Computes an action index from a shaped state.
    ///
    /// `epsilon` is the exploration rate; `None` acts on the model output alone.
    fn choose_action(&mut self, state: &[f32], epsilon: Option<f32>) -> Result<i64>;

    fn train(&mut self, batch: &Self::Batch) -> Result<Self::Output>;
}
