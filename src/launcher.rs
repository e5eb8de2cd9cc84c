//! Wires configuration, environment, agents and actors into a training run.
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::info;

use crate::agent::CimAgent;
use crate::agent_manager::{
    AgentManagerMode, DqnAgentManager, Shapers, SimpleAgentManager, create_dqn_agents,
};
use crate::config::Config;
use crate::distributed::{Actor, ActorHandle, ActorProxy, LocalActor, ProxyParams, SimpleLearner};
use crate::environment::{Environment, Performance};
use crate::environments::cim::{CimEnv, EnvConfig};
use crate::exploration::TwoPhaseLinearExplorer;
use crate::shaping::{CimActionShaper, CimStateShaper, TruncatedExperienceShaper};

pub const LEARNER_NAME: &str = "distributed_cim_learner";

/// Derives the model input size from the state shaping settings.
pub fn set_input_dim(config: &mut Config) {
    config.agents.algorithm.input_dim = config.state_shaping.input_dim();
}

/// Outcome of a finished run.
#[derive(Debug, Clone)]
pub struct LaunchReport {
    pub performance_history: Vec<f64>,
    pub test_performance: f64,
    pub model_dir: PathBuf,
}

pub fn cim_shapers(config: &Config) -> Result<Shapers<CimEnv>> {
    Ok(Shapers {
        state: Box::new(CimStateShaper::new(config.state_shaping.clone())?),
        action: Box::new(CimActionShaper::new(config.agents.algorithm.num_actions)?),
        experience: Box::new(TruncatedExperienceShaper::new(
            config.experience_shaping.clone(),
        )?),
    })
}

/// Builds the `index`-th actor; each actor draws its own order stream.
pub fn build_actor(config: &Config, index: usize) -> Result<Actor<CimEnv, CimAgent>> {
    let env = CimEnv::new(&EnvConfig {
        seed: config.env.seed.wrapping_add(index as u64),
        ..config.env.clone()
    })?;
    let agent_ids = env.agent_ids();
    let agents = create_dqn_agents(&agent_ids, &config.agents, config.agents.device.device())?;
    let agent_manager = SimpleAgentManager::new(
        format!("cim_actor_{index}"),
        AgentManagerMode::Inference,
        agents,
        cim_shapers(config)?,
    );
    Ok(Actor::new(format!("actor_{index}"), env, agent_manager))
}

fn learner_agent_manager(config: &Config) -> Result<DqnAgentManager<CimAgent>> {
    let env = CimEnv::new(&config.env)?;
    let agent_ids = env.agent_ids();
    let explorer = TwoPhaseLinearExplorer::from_config(
        &agent_ids,
        config.general.total_training_episodes,
        &config.exploration,
    )?;
    let agents = create_dqn_agents(&agent_ids, &config.agents, config.agents.device.device())?;
    Ok(DqnAgentManager::new(
        LEARNER_NAME,
        AgentManagerMode::Train,
        agents,
        Box::new(explorer),
    ))
}

fn default_model_dir() -> Result<PathBuf> {
    Ok(std::env::current_dir()
        .context("failed to read the working directory")?
        .join("models"))
}

fn run<H>(config: &Config, actor: H, model_dir: Option<PathBuf>) -> Result<LaunchReport>
where
    H: ActorHandle,
    H::Metrics: Performance,
{
    let agent_manager = learner_agent_manager(config)?;
    let mut learner = SimpleLearner::new(agent_manager, actor);
    learner.train(config.general.total_training_episodes)?;
    let test_performance = learner.test()?;

    let model_dir = match model_dir {
        Some(dir) => dir,
        None => default_model_dir()?,
    };
    learner.dump_models(&model_dir)?;
    learner.exit()?;

    Ok(LaunchReport {
        performance_history: learner.performance_history().to_vec(),
        test_performance,
        model_dir,
    })
}

/// Trains against a group of actor peers, tests greedily and dumps the models
/// (to `<cwd>/models` unless `model_dir` is given).
pub fn launch(mut config: Config, model_dir: Option<PathBuf>) -> Result<LaunchReport> {
    set_input_dim(&mut config);
    config.validate()?;

    let proxy_params = ProxyParams {
        group_name: config.distributed.group_name.clone(),
        expected_peers: config.distributed.expected_actors(),
        redis_address: config.distributed.redis.address(),
    };
    info!(
        "{LEARNER_NAME}: {} episodes with {} actors",
        config.general.total_training_episodes, proxy_params.expected_peers
    );

    let actor_config = config.clone();
    let proxy = ActorProxy::new(proxy_params, move |index| build_actor(&actor_config, index))?;
    run(&config, proxy, model_dir)
}

/// Same as [`launch`] with a single actor on the calling thread.
pub fn launch_single(mut config: Config, model_dir: Option<PathBuf>) -> Result<LaunchReport> {
    set_input_dim(&mut config);
    config.validate()?;
    info!(
        "{LEARNER_NAME}: {} episodes with a local actor",
        config.general.total_training_episodes
    );
    let actor = LocalActor::new(build_actor(&config, 0)?);
    run(&config, actor, model_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;

    #[test]
    fn input_dim_is_derived_from_state_shaping() {
        let mut config = Config::from_yaml_str(SAMPLE).unwrap();
        set_input_dim(&mut config);
        // (2 + 1) * (2 + 1) * 5 port attributes + 3 vessel attributes
        assert_eq!(config.agents.algorithm.input_dim, 48);
    }

    #[test]
    fn actors_are_named_by_index() {
        let mut config = Config::from_yaml_str(SAMPLE).unwrap();
        set_input_dim(&mut config);
        let first = build_actor(&config, 0).unwrap();
        let second = build_actor(&config, 1).unwrap();
        assert_eq!(first.name(), "actor_0");
        assert_eq!(second.name(), "actor_1");
        assert_eq!(first.agent_manager().agent_ids().count(), 4);
    }
}
