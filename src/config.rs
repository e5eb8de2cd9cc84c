//! YAML configuration for training runs.
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use tch::Device;

use crate::agent::TrainingLoopParams;
use crate::algorithms::{DqnHyperParams, OptimizerParams};
use crate::environments::cim::EnvConfig;
use crate::exploration::ExplorationConfig;
use crate::shaping::{ExperienceShapingConfig, StateShapingConfig};
use crate::storage::ExperiencePoolConfig;

/// Peer type the learner waits for.
pub const ACTOR_PEER: &str = "actor";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub env: EnvConfig,
    pub general: GeneralConfig,
    pub state_shaping: StateShapingConfig,
    #[serde(default)]
    pub experience_shaping: ExperienceShapingConfig,
    pub exploration: ExplorationConfig,
    pub agents: AgentsConfig,
    pub distributed: DistributedConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub total_training_episodes: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    #[default]
    Cpu,
    CudaIfAvailable,
}

impl DeviceKind {
    pub fn device(self) -> Device {
        match self {
            DeviceKind::Cpu => Device::Cpu,
            DeviceKind::CudaIfAvailable => Device::cuda_if_available(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default)]
    pub seed: u64,
    pub algorithm: AlgorithmConfig,
    #[serde(default)]
    pub experience_pool: ExperiencePoolConfig,
    #[serde(default)]
    pub training_loop_parameters: TrainingLoopParams,
    #[serde(default)]
    pub device: DeviceKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    pub num_actions: usize,
    /// Filled in from the state shaping settings when left at zero.
    #[serde(default)]
    pub input_dim: usize,
    pub model: ModelConfig,
    #[serde(default)]
    pub optimizer: OptimizerParams,
    pub hyper_parameters: HyperParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub hidden_dims: Vec<usize>,
    #[serde(default)]
    pub softmax: bool,
    #[serde(default)]
    pub batch_norm: bool,
    #[serde(default)]
    pub skip_connection: bool,
    #[serde(default)]
    pub dropout_p: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperParameters {
    pub reward_discount: f32,
    #[serde(default = "default_target_update_frequency")]
    pub target_update_frequency: usize,
    #[serde(default = "default_tau")]
    pub tau: f64,
    #[serde(default = "default_is_double")]
    pub is_double: bool,
}

fn default_target_update_frequency() -> usize {
    1
}

fn default_tau() -> f64 {
    0.1
}

fn default_is_double() -> bool {
    true
}

impl AlgorithmConfig {
    pub fn dqn_hyper_params(&self) -> DqnHyperParams {
        let hp = &self.hyper_parameters;
        DqnHyperParams {
            num_actions: self.num_actions,
            reward_discount: hp.reward_discount,
            target_update_frequency: hp.target_update_frequency,
            tau: hp.tau,
            is_double: hp.is_double,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Number of peers expected per peer type.
    #[serde(default)]
    pub peer: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host_name: String,
    pub port: u16,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host_name: "localhost".to_string(),
            port: 6379,
        }
    }
}

impl RedisConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host_name, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedConfig {
    pub group_name: String,
    pub learner: PeerConfig,
    #[serde(default)]
    pub actor: PeerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
}

impl DistributedConfig {
    /// Actors the learner waits for.
    pub fn expected_actors(&self) -> usize {
        self.learner.peer.get(ACTOR_PEER).copied().unwrap_or_default()
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_yaml_str(&contents).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml).context("failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.general.total_training_episodes > 0,
            "general.total_training_episodes must be positive"
        );

        let algorithm = &self.agents.algorithm;
        algorithm.dqn_hyper_params().validate()?;
        ensure!(
            algorithm.model.hidden_dims.iter().all(|&d| d > 0),
            "agents.algorithm.model.hidden_dims must be positive"
        );
        let expected_dim = self.state_shaping.input_dim();
        ensure!(
            algorithm.input_dim == 0 || algorithm.input_dim == expected_dim,
            "agents.algorithm.input_dim is {} but state shaping produces {expected_dim}",
            algorithm.input_dim
        );

        let training = &self.agents.training_loop_parameters;
        ensure!(
            training.batch_size > 0 && training.num_batches > 0,
            "training_loop_parameters need a positive batch_size and num_batches"
        );
        ensure!(
            training.min_experiences_to_train > 0,
            "training_loop_parameters.min_experiences_to_train must be positive"
        );
        // batch norm cannot normalise a single sample in training mode
        ensure!(
            !algorithm.model.batch_norm || training.batch_size > 1,
            "batch_norm needs batch_size > 1"
        );
        ensure!(
            self.agents.experience_pool.capacity != Some(0),
            "experience_pool.capacity must be positive"
        );

        ensure!(
            !self.distributed.group_name.is_empty(),
            "distributed.group_name cannot be empty"
        );
        ensure!(
            self.distributed.expected_actors() > 0,
            "distributed.learner.peer.{ACTOR_PEER} must be positive"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"
env:
  scenario: cim
  topology: toy.4p_ssdd
  durations: 60
general:
  total_training_episodes: 3
state_shaping:
  look_back: 2
  max_ports_downstream: 2
  port_attributes: [empty, full, booking, shortage, fulfillment]
  vessel_attributes: [empty, full, remaining_space]
experience_shaping:
  time_window: 20
  time_decay_factor: 0.97
  fulfillment_factor: 1.0
  shortage_factor: 1.0
exploration:
  epsilon_range: [0.0, 0.4]
  split_point: [0.5, 0.2]
agents:
  seed: 1024
  algorithm:
    num_actions: 5
    model:
      hidden_dims: [32, 16]
      batch_norm: true
    optimizer:
      lr: 0.01
    hyper_parameters:
      reward_discount: 0.9
      tau: 0.1
  experience_pool:
    capacity: 5000
  training_loop_parameters:
    min_experiences_to_train: 16
    num_batches: 2
    batch_size: 8
distributed:
  group_name: cim-dqn-test
  learner:
    peer:
      actor: 2
  actor:
    peer:
      learner: 1
  redis:
    host_name: localhost
    port: 6379
"#;

    #[test]
    fn sample_config_parses_with_defaults() {
        let config = Config::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.distributed.expected_actors(), 2);
        assert_eq!(config.distributed.redis.address(), "localhost:6379");
        assert_eq!(config.agents.device, DeviceKind::Cpu);
        assert_eq!(config.agents.algorithm.input_dim, 0);
        assert_eq!(config.state_shaping.input_dim(), 3 * 3 * 5 + 3);

        let hp = config.agents.algorithm.dqn_hyper_params();
        assert_eq!(hp.num_actions, 5);
        assert_eq!(hp.target_update_frequency, 1);
        assert!(hp.is_double);
        assert_eq!(config.agents.algorithm.optimizer.alpha, 0.99);
    }

    #[test]
    fn inconsistent_configs_are_rejected() {
        let mut config = Config::from_yaml_str(SAMPLE).unwrap();
        config.agents.training_loop_parameters.batch_size = 1;
        assert!(config.validate().is_err());

        let mut config = Config::from_yaml_str(SAMPLE).unwrap();
        config.agents.training_loop_parameters.min_experiences_to_train = 0;
        assert!(config.validate().is_err());

        let mut config = Config::from_yaml_str(SAMPLE).unwrap();
        config.agents.algorithm.input_dim = 7;
        assert!(config.validate().is_err());

        let mut config = Config::from_yaml_str(SAMPLE).unwrap();
        config.distributed.learner.peer.clear();
        assert!(config.validate().is_err());

        assert!(Config::from_yaml_str("env: {}").is_err());
    }

    #[test]
    fn config_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dqn.yml");
        fs::write(&path, SAMPLE).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.general.total_training_episodes, 3);
        assert!(Config::from_file(dir.path().join("missing.yml")).is_err());
    }
}
