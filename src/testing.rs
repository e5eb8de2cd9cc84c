//! A tiny deterministic environment and agent for exercising the actor and learner plumbing.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, bail};
use tch::Device;

use crate::agent::{CimAgent, TrainingLoopParams};
use crate::agent_manager::{AgentManagerMode, Shapers, SimpleAgentManager};
use crate::algorithms::{Dqn, DqnHyperParams, OptimizerParams};
use crate::distributed::Actor;
use crate::environment::{Environment, Performance, StepResult};
use crate::networks::{Activation, FcNetConfig, LearningModel};
use crate::shaping::{ActionShaper, ExperienceShaper, StateShaper, TransitionRecord};
use crate::storage::{ExperiencePool, ExperiencePoolConfig, ExperienceSet};

pub(crate) const TOY_AGENT: &str = "toy";
pub(crate) const TOY_SCORE: f64 = 0.75;
pub(crate) const TOY_ACTIONS: usize = 3;

/// How a `ToyEnv` misbehaves, keyed by the zero-based episode (one per `reset`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Failure {
    None,
    ErrorOn(usize),
    PanicOn(usize),
}

/// Counts live environments so tests can tell whether peer threads dropped theirs.
pub(crate) struct AliveGuard(Arc<AtomicUsize>);

impl AliveGuard {
    pub(crate) fn new(alive: &Arc<AtomicUsize>) -> Self {
        alive.fetch_add(1, Ordering::SeqCst);
        AliveGuard(Arc::clone(alive))
    }
}

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ToyMetrics {
    pub decisions: usize,
}

impl Performance for ToyMetrics {
    fn score(&self) -> f64 {
        TOY_SCORE
    }
}

/// One agent, `decisions` decision events per episode, one per tick.
pub(crate) struct ToyEnv {
    decisions: usize,
    tick: usize,
    episodes: usize,
    failure: Failure,
    taken: Vec<i64>,
    _alive: Option<AliveGuard>,
}

impl ToyEnv {
    pub(crate) fn new(decisions: usize, failure: Failure, alive: Option<AliveGuard>) -> Self {
        ToyEnv {
            decisions,
            tick: 0,
            episodes: 0,
            failure,
            taken: Vec::new(),
            _alive: alive,
        }
    }

    fn episode(&self) -> usize {
        self.episodes.saturating_sub(1)
    }
}

impl Environment for ToyEnv {
    type DecisionEvent = usize;
    type Action = i64;
    type Metrics = ToyMetrics;

    fn reset(&mut self) {
        self.episodes += 1;
        if self.failure == Failure::PanicOn(self.episode()) {
            panic!("toy environment broke in episode {}", self.episode());
        }
        self.tick = 0;
        self.taken.clear();
    }

    fn step(&mut self, action: Option<i64>) -> Result<StepResult<usize>> {
        if self.failure == Failure::ErrorOn(self.episode()) {
            bail!("toy environment failed in episode {}", self.episode());
        }
        if let Some(action) = action {
            self.taken.push(action);
            self.tick += 1;
        }
        let done = self.tick >= self.decisions;
        Ok(StepResult {
            decision_event: (!done).then_some(self.tick),
            done,
        })
    }

    fn tick(&self) -> usize {
        self.tick
    }

    fn agent_ids(&self) -> Vec<String> {
        vec![TOY_AGENT.to_string()]
    }

    fn agent_of(&self, _event: &usize) -> String {
        TOY_AGENT.to_string()
    }

    fn metrics(&self) -> ToyMetrics {
        ToyMetrics {
            decisions: self.taken.len(),
        }
    }
}

pub(crate) struct ToyStateShaper;

impl StateShaper<ToyEnv> for ToyStateShaper {
    fn dim(&self) -> usize {
        2
    }

    fn shape(&self, event: &usize, _env: &ToyEnv) -> Result<Vec<f32>> {
        Ok(vec![*event as f32, 1.0])
    }
}

pub(crate) struct ToyActionShaper;

impl ActionShaper<ToyEnv> for ToyActionShaper {
    fn shape(&self, action_index: i64, _event: &usize, _env: &ToyEnv) -> Result<i64> {
        Ok(action_index)
    }
}

/// Chains consecutive decisions of each agent with a reward of 1.
#[derive(Default)]
pub(crate) struct ToyExperienceShaper {
    records: Vec<TransitionRecord<usize>>,
}

impl ExperienceShaper<ToyEnv> for ToyExperienceShaper {
    fn record(&mut self, transition: TransitionRecord<usize>) {
        self.records.push(transition);
    }

    fn shape(&mut self, _env: &ToyEnv) -> Result<BTreeMap<String, ExperienceSet>> {
        let mut by_agent: BTreeMap<String, Vec<TransitionRecord<usize>>> = BTreeMap::new();
        for record in self.records.drain(..) {
            by_agent.entry(record.agent_id.clone()).or_default().push(record);
        }
        Ok(by_agent
            .into_iter()
            .map(|(agent_id, records)| {
                let mut set = ExperienceSet::default();
                for pair in records.windows(2) {
                    set.push(pair[0].state.clone(), pair[0].action, 1.0, pair[1].state.clone());
                }
                (agent_id, set)
            })
            .collect())
    }

    fn reset(&mut self) {
        self.records.clear();
    }
}

pub(crate) fn toy_shapers() -> Shapers<ToyEnv> {
    Shapers {
        state: Box::new(ToyStateShaper),
        action: Box::new(ToyActionShaper),
        experience: Box::new(ToyExperienceShaper::default()),
    }
}

pub(crate) fn toy_agent(name: &str) -> CimAgent {
    let model = LearningModel::new(
        &FcNetConfig {
            name: format!("{name}.policy"),
            input_dim: 2,
            output_dim: TOY_ACTIONS,
            hidden_dims: vec![4],
            activation: Activation::LeakyRelu,
            softmax: false,
            batch_norm: false,
            skip_connection: false,
            dropout_p: 0.0,
        },
        Device::Cpu,
    )
    .unwrap();
    let dqn = Dqn::new(
        model,
        &OptimizerParams::default(),
        DqnHyperParams {
            num_actions: TOY_ACTIONS,
            reward_discount: 0.5,
            target_update_frequency: 1,
            tau: 0.1,
            is_double: false,
        },
        11,
    )
    .unwrap();
    let pool = ExperiencePool::new(&ExperiencePoolConfig::default(), 11).unwrap();
    CimAgent::new(
        name,
        dqn,
        pool,
        TrainingLoopParams {
            min_experiences_to_train: 1,
            num_batches: 2,
            batch_size: 4,
        },
    )
    .unwrap()
}

pub(crate) fn toy_agents() -> BTreeMap<String, CimAgent> {
    BTreeMap::from([(TOY_AGENT.to_string(), toy_agent(TOY_AGENT))])
}

pub(crate) fn toy_manager(mode: AgentManagerMode) -> SimpleAgentManager<ToyEnv> {
    SimpleAgentManager::new("toy_manager", mode, toy_agents(), toy_shapers())
}

pub(crate) fn toy_actor(
    name: &str,
    decisions: usize,
    failure: Failure,
    alive: Option<AliveGuard>,
) -> Actor<ToyEnv, CimAgent> {
    Actor::new(
        name,
        ToyEnv::new(decisions, failure, alive),
        toy_manager(AgentManagerMode::Inference),
    )
}
