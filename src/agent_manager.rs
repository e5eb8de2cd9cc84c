use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, ensure};
use log::{debug, info, warn};
use tch::Device;

use crate::agent::{Agent, CimAgent};
use crate::algorithms::Dqn;
use crate::config::AgentsConfig;
use crate::environment::Environment;
use crate::exploration::Explorer;
use crate::networks::{Activation, FcNetConfig, LearningModel, ModelParameters};
use crate::shaping::{ActionShaper, ExperienceShaper, StateShaper, TransitionRecord};
use crate::storage::{ExperiencePool, ExperienceSet};
use crate::utils::set_seeds;

/// Loss given to freshly stored experiences so they are sampled before anything already trained on.
pub const INITIAL_LOSS: f32 = 1e8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentManagerMode {
    Train,
    Inference,
    TrainInference,
}

impl AgentManagerMode {
    pub fn can_train(self) -> bool {
        matches!(self, AgentManagerMode::Train | AgentManagerMode::TrainInference)
    }

    pub fn can_infer(self) -> bool {
        matches!(self, AgentManagerMode::Inference | AgentManagerMode::TrainInference)
    }
}

/// One DQN agent per id, each with a `<id>.policy` network.
pub fn create_dqn_agents(
    agent_ids: &[String],
    config: &AgentsConfig,
    device: Device,
) -> Result<BTreeMap<String, CimAgent>> {
    let algorithm = &config.algorithm;
    ensure!(
        algorithm.input_dim > 0,
        "agents.algorithm.input_dim is unset, derive it from the state shaping settings first"
    );
    set_seeds(config.seed);

    let mut agents = BTreeMap::new();
    for (i, agent_id) in agent_ids.iter().enumerate() {
        let seed = config.seed.wrapping_add(i as u64);
        let model = LearningModel::new(
            &FcNetConfig {
                name: format!("{agent_id}.policy"),
                input_dim: algorithm.input_dim,
                output_dim: algorithm.num_actions,
                hidden_dims: algorithm.model.hidden_dims.clone(),
                activation: Activation::LeakyRelu,
                softmax: algorithm.model.softmax,
                batch_norm: algorithm.model.batch_norm,
                skip_connection: algorithm.model.skip_connection,
                dropout_p: algorithm.model.dropout_p,
            },
            device,
        )?;
        let dqn = Dqn::new(model, &algorithm.optimizer, algorithm.dqn_hyper_params(), seed)?;
        let experience_pool = ExperiencePool::new(&config.experience_pool, seed)?;
        let agent = CimAgent::new(
            agent_id.clone(),
            dqn,
            experience_pool,
            config.training_loop_parameters.clone(),
        )?;
        agents.insert(agent_id.clone(), agent);
    }
    debug!("created {} DQN agents on {device:?}", agents.len());
    Ok(agents)
}

fn agent_parameters<A: Agent>(agents: &BTreeMap<String, A>) -> BTreeMap<String, ModelParameters> {
    agents
        .iter()
        .map(|(id, agent)| (id.clone(), agent.parameters()))
        .collect()
}

fn dump_agent_models<A: Agent>(agents: &BTreeMap<String, A>, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create model directory {}", dir.display()))?;
    for agent in agents.values() {
        agent.dump_model(dir)?;
    }
    info!("dumped {} models to {}", agents.len(), dir.display());
    Ok(())
}

fn load_agent_models<A: Agent>(agents: &mut BTreeMap<String, A>, dir: &Path) -> Result<()> {
    for agent in agents.values_mut() {
        agent.load_model(dir)?;
    }
    Ok(())
}

/// The three shapers an inference manager translates through.
pub struct Shapers<E: Environment> {
    pub state: Box<dyn StateShaper<E>>,
    pub action: Box<dyn ActionShaper<E>>,
    pub experience: Box<dyn ExperienceShaper<E>>,
}

/// Actor-side manager: turns decision events into actions and finished episodes into experiences.
pub struct SimpleAgentManager<E: Environment, A: Agent = CimAgent> {
    name: String,
    mode: AgentManagerMode,
    agents: BTreeMap<String, A>,
    shapers: Shapers<E>,
    epsilon: BTreeMap<String, f32>,
    pending: Option<TransitionRecord<E::DecisionEvent>>,
}

impl<E: Environment, A: Agent> SimpleAgentManager<E, A> {
    pub fn new(
        name: impl Into<String>,
        mode: AgentManagerMode,
        agents: BTreeMap<String, A>,
        shapers: Shapers<E>,
    ) -> Self {
        SimpleAgentManager {
            name: name.into(),
            mode,
            agents,
            shapers,
            epsilon: BTreeMap::new(),
            pending: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> AgentManagerMode {
        self.mode
    }

    pub fn agent_ids(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    /// An empty map means greedy actions for every agent.
    pub fn set_epsilon(&mut self, epsilon: BTreeMap<String, f32>) {
        self.epsilon = epsilon;
    }

    pub fn epsilon(&self) -> &BTreeMap<String, f32> {
        &self.epsilon
    }

    pub fn choose_action(&mut self, event: &E::DecisionEvent, env: &E) -> Result<E::Action> {
        ensure!(
            self.mode.can_infer(),
            "{} is in {:?} mode and cannot choose actions",
            self.name,
            self.mode
        );

        let agent_id = env.agent_of(event);
        let state = self.shapers.state.shape(event, env)?;
        let epsilon = self.epsilon.get(&agent_id).copied();
        let agent = self
            .agents
            .get_mut(&agent_id)
            .ok_or_else(|| anyhow!("{}: no agent for '{agent_id}'", self.name))?;
        let action_index = agent.choose_action(&state, epsilon)?;
        let action = self.shapers.action.shape(action_index, event, env)?;

        if self.pending.is_some() {
            warn!("{}: previous decision got no feedback, recording it anyway", self.name);
            self.on_env_feedback();
        }
        self.pending = Some(TransitionRecord {
            agent_id,
            state,
            action: action_index,
            event: event.clone(),
        });
        Ok(action)
    }

    /// Marks the last chosen action as applied by the environment.
    pub fn on_env_feedback(&mut self) {
        if let Some(transition) = self.pending.take() {
            self.shapers.experience.record(transition);
        }
    }

    /// Shapes the finished episode into experiences grouped by agent.
    pub fn post_process(&mut self, env: &E) -> Result<BTreeMap<String, ExperienceSet>> {
        self.on_env_feedback();
        self.shapers.experience.shape(env)
    }

    /// Forgets the current episode.
    pub fn reset(&mut self) {
        self.pending = None;
        self.shapers.experience.reset();
    }

    pub fn parameters(&self) -> BTreeMap<String, ModelParameters> {
        agent_parameters(&self.agents)
    }

    pub fn load_parameters(&mut self, parameters: &BTreeMap<String, ModelParameters>) -> Result<()> {
        for (agent_id, params) in parameters {
            let agent = self
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| anyhow!("{}: no agent for '{agent_id}'", self.name))?;
            agent.load_parameters(params)?;
        }
        Ok(())
    }

    pub fn dump_models(&self, dir: &Path) -> Result<()> {
        dump_agent_models(&self.agents, dir)
    }

    pub fn load_models(&mut self, dir: &Path) -> Result<()> {
        load_agent_models(&mut self.agents, dir)
    }
}

/// Learner-side manager: stores gathered experiences, trains every agent and owns the explorer.
pub struct DqnAgentManager<A: Agent = CimAgent> {
    name: String,
    mode: AgentManagerMode,
    agents: BTreeMap<String, A>,
    explorer: Box<dyn Explorer>,
}

impl<A: Agent> DqnAgentManager<A> {
    pub fn new(
        name: impl Into<String>,
        mode: AgentManagerMode,
        agents: BTreeMap<String, A>,
        explorer: Box<dyn Explorer>,
    ) -> Self {
        DqnAgentManager {
            name: name.into(),
            mode,
            agents,
            explorer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> AgentManagerMode {
        self.mode
    }

    pub fn agents(&self) -> &BTreeMap<String, A> {
        &self.agents
    }

    pub fn explorer(&self) -> &dyn Explorer {
        self.explorer.as_ref()
    }

    pub fn epsilon(&self) -> &BTreeMap<String, f32> {
        self.explorer.epsilon()
    }

    pub fn update_epsilon(&mut self, performance: Option<f64>) {
        self.explorer.update(performance);
    }

    pub fn train(&mut self, experiences_by_agent: BTreeMap<String, ExperienceSet>) -> Result<()> {
        ensure!(
            self.mode.can_train(),
            "{} is in {:?} mode and cannot train",
            self.name,
            self.mode
        );

        for (agent_id, experiences) in experiences_by_agent {
            let agent = self
                .agents
                .get_mut(&agent_id)
                .ok_or_else(|| anyhow!("{}: experiences for unknown agent '{agent_id}'", self.name))?;
            agent.store_experiences(experiences.with_loss(INITIAL_LOSS))?;
        }

        for agent in self.agents.values_mut() {
            agent.train()?;
        }
        Ok(())
    }

    pub fn parameters(&self) -> BTreeMap<String, ModelParameters> {
        agent_parameters(&self.agents)
    }

    pub fn dump_models(&self, dir: &Path) -> Result<()> {
        dump_agent_models(&self.agents, dir)
    }

    pub fn load_models(&mut self, dir: &Path) -> Result<()> {
        load_agent_models(&mut self.agents, dir)
    }
}
