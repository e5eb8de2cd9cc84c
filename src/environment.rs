use std::fmt::Debug;

use anyhow::Result;

/// Outcome of advancing an environment until the next decision point.
pub struct StepResult<E> {
    /// Pending decision, `None` once the episode is over.
    pub decision_event: Option<E>,
    pub done: bool,
}

/// Scalar view of an episode's metrics, higher is better.
pub trait Performance {
    fn score(&self) -> f64;
}

/// Event-driven multi-agent environment.
///
/// Each decision event belongs to exactly one agent. `step(None)` starts an episode after
/// `reset`, and every later call answers the event returned by the previous one.
pub trait Environment {
    type DecisionEvent: Clone + Debug;
    type Action: Debug;
    type Metrics: Performance + Clone + Debug + Send + 'static;

    fn reset(&mut self);
    fn step(&mut self, action: Option<Self::Action>) -> Result<StepResult<Self::DecisionEvent>>;

    /// 当前时间步
    fn tick(&self) -> usize;

    /// 所有智能体 id
    fn agent_ids(&self) -> Vec<String>;

    /// Agent that owns `event`.
    fn agent_of(&self, event: &Self::DecisionEvent) -> String;

    fn metrics(&self) -> Self::Metrics;
}
