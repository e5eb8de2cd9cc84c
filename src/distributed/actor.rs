use anyhow::Result;
use log::debug;

use super::message::{GatheredRollOut, RollOutRequest, RollOutResult};
use crate::agent::Agent;
use crate::agent_manager::SimpleAgentManager;
use crate::environment::Environment;

/// Whatever the learner rolls episodes out through.
pub trait ActorHandle {
    type Metrics: std::fmt::Debug;

    fn roll_out(&mut self, request: RollOutRequest) -> Result<GatheredRollOut<Self::Metrics>>;

    fn exit(&mut self) -> Result<()>;
}

/// An environment driven by an inference agent manager.
pub struct Actor<E: Environment, A: Agent> {
    name: String,
    env: E,
    agent_manager: SimpleAgentManager<E, A>,
}

impl<E: Environment, A: Agent> Actor<E, A> {
    pub fn new(name: impl Into<String>, env: E, agent_manager: SimpleAgentManager<E, A>) -> Self {
        Actor {
            name: name.into(),
            env,
            agent_manager,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn agent_manager(&self) -> &SimpleAgentManager<E, A> {
        &self.agent_manager
    }

    /// Runs one full episode.
    pub fn roll_out(&mut self, request: &RollOutRequest) -> Result<RollOutResult<E::Metrics>> {
        if let Some(parameters) = &request.parameters {
            self.agent_manager.load_parameters(parameters)?;
        }
        self.agent_manager
            .set_epsilon(request.epsilon.clone().unwrap_or_default());

        self.env.reset();
        self.agent_manager.reset();

        let mut decisions = 0;
        let mut result = self.env.step(None)?;
        while let Some(event) = result.decision_event {
            let action = self.agent_manager.choose_action(&event, &self.env)?;
            result = self.env.step(Some(action))?;
            self.agent_manager.on_env_feedback();
            decisions += 1;
        }

        let experiences = if request.return_experiences {
            Some(self.agent_manager.post_process(&self.env)?)
        } else {
            self.agent_manager.reset();
            None
        };
        let metrics = self.env.metrics();
        debug!(
            "{}: episode {} finished after {decisions} decisions, {metrics:?}",
            self.name, request.episode
        );

        Ok(RollOutResult {
            actor: self.name.clone(),
            episode: request.episode,
            metrics,
            experiences,
        })
    }
}

/// Runs roll-outs on the calling thread.
pub struct LocalActor<E: Environment, A: Agent> {
    actor: Actor<E, A>,
}

impl<E: Environment, A: Agent> LocalActor<E, A> {
    pub fn new(actor: Actor<E, A>) -> Self {
        LocalActor { actor }
    }
}

impl<E: Environment, A: Agent> ActorHandle for LocalActor<E, A> {
    type Metrics = E::Metrics;

    fn roll_out(&mut self, request: RollOutRequest) -> Result<GatheredRollOut<E::Metrics>> {
        let result = self.actor.roll_out(&request)?;
        Ok(GatheredRollOut::gather(vec![result]))
    }

    fn exit(&mut self) -> Result<()> {
        Ok(())
    }
}
