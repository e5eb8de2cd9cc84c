use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::algorithms::{Algorithm, Dqn};
use crate::networks::ModelParameters;
use crate::storage::{ExperiencePool, ExperienceSet};

/// A named learner that owns its algorithm and its experience pool.
pub trait Agent {
    fn name(&self) -> &str;

    fn choose_action(&mut self, state: &[f32], epsilon: Option<f32>) -> Result<i64>;

    // experiences must already carry a loss column
    fn store_experiences(&mut self, experiences: ExperienceSet) -> Result<()>;

    /// Runs the training loop over the pool, or nothing while the pool is still too small.
    fn train(&mut self) -> Result<()>;

    fn parameters(&self) -> ModelParameters;

    fn load_parameters(&mut self, parameters: &ModelParameters) -> Result<()>;

    fn dump_model(&self, dir: &Path) -> Result<()>;

    fn load_model(&mut self, dir: &Path) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingLoopParams {
    pub min_experiences_to_train: usize,
    pub num_batches: usize,
    pub batch_size: usize,
}

impl Default for TrainingLoopParams {
    fn default() -> Self {
        Self {
            min_experiences_to_train: 1024,
            num_batches: 10,
            batch_size: 128,
        }
    }
}

/// Where an agent's weights live inside a model directory.
pub fn model_path(dir: &Path, agent_name: &str) -> PathBuf {
    dir.join(format!("{agent_name}.pt"))
}

/// DQN agent for one port: batches are drawn in proportion to their last loss.
pub struct CimAgent {
    name: String,
    algorithm: Dqn,
    experience_pool: ExperiencePool,
    params: TrainingLoopParams,
}

impl CimAgent {
    pub fn new(
        name: impl Into<String>,
        algorithm: Dqn,
        experience_pool: ExperiencePool,
        params: TrainingLoopParams,
    ) -> Result<Self> {
        ensure!(params.batch_size > 0, "batch_size must be positive");
        ensure!(params.num_batches > 0, "num_batches must be positive");
        Ok(CimAgent {
            name: name.into(),
            algorithm,
            experience_pool,
            params,
        })
    }

    pub fn algorithm(&self) -> &Dqn {
        &self.algorithm
    }

    pub fn experience_pool(&self) -> &ExperiencePool {
        &self.experience_pool
    }
}

impl Agent for CimAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn choose_action(&mut self, state: &[f32], epsilon: Option<f32>) -> Result<i64> {
        self.algorithm.choose_action(state, epsilon)
    }

    fn store_experiences(&mut self, experiences: ExperienceSet) -> Result<()> {
        let stored = experiences.len();
        self.experience_pool
            .put(experiences)
            .with_context(|| format!("{}: failed to store experiences", self.name))?;
        debug!(
            "{}: stored {stored} experiences, pool size {}",
            self.name,
            self.experience_pool.len()
        );
        Ok(())
    }

    fn train(&mut self) -> Result<()> {
        // an empty pool has nothing to sample, whatever the threshold says
        let threshold = self.params.min_experiences_to_train.max(1);
        if self.experience_pool.len() < threshold {
            debug!(
                "{}: {} experiences, waiting for {threshold}",
                self.name,
                self.experience_pool.len()
            );
            return Ok(());
        }

        let mut total_loss = 0.0;
        for _ in 0..self.params.num_batches {
            let (indexes, batch) = self.experience_pool.sample_by_loss(self.params.batch_size)?;
            let losses = self.algorithm.train(&batch)?;
            total_loss += losses.iter().sum::<f32>() / losses.len() as f32;
            self.experience_pool.update_losses(&indexes, &losses)?;
        }
        debug!(
            "{}: trained on {} batches, mean loss {:.4}",
            self.name,
            self.params.num_batches,
            total_loss / self.params.num_batches as f32
        );
        Ok(())
    }

    fn parameters(&self) -> ModelParameters {
        self.algorithm.model().parameters()
    }

    fn load_parameters(&mut self, parameters: &ModelParameters) -> Result<()> {
        self.algorithm.model_mut().load_parameters(parameters)?;
        self.algorithm.sync_target()
    }

    fn dump_model(&self, dir: &Path) -> Result<()> {
        self.algorithm.model().save(model_path(dir, &self.name))
    }

    fn load_model(&mut self, dir: &Path) -> Result<()> {
        self.algorithm
            .model_mut()
            .load(model_path(dir, &self.name))?;
        self.algorithm.sync_target()
    }
}
