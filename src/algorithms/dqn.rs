use anyhow::{Result, ensure};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tch::nn::OptimizerConfig;
use tch::{Device, Kind, Reduction, Tensor, nn};

use super::Algorithm;
use crate::networks::LearningModel;
use crate::storage::ExperienceSet;
use crate::utils::ToTensor;

/// RMSprop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerParams {
    pub lr: f64,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_eps")]
    pub eps: f64,
    #[serde(default)]
    pub weight_decay: f64,
    #[serde(default)]
    pub momentum: f64,
    #[serde(default)]
    pub centered: bool,
}

fn default_alpha() -> f64 {
    0.99
}

fn default_eps() -> f64 {
    1e-8
}

impl Default for OptimizerParams {
    fn default() -> Self {
        Self {
            lr: 0.05,
            alpha: default_alpha(),
            eps: default_eps(),
            weight_decay: 0.0,
            momentum: 0.0,
            centered: false,
        }
    }
}

impl OptimizerParams {
    fn build(&self, vs: &nn::VarStore) -> Result<nn::Optimizer> {
        ensure!(self.lr > 0.0, "learning rate must be positive");
        let config = nn::RmsProp {
            alpha: self.alpha,
            eps: self.eps,
            wd: self.weight_decay,
            momentum: self.momentum,
            centered: self.centered,
        };
        Ok(config.build(vs, self.lr)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DqnHyperParams {
    pub num_actions: usize,
    pub reward_discount: f32,
    /// Soft-update the target model every this many training calls.
    #[serde(default = "default_target_update_frequency")]
    pub target_update_frequency: usize,
    #[serde(default = "default_tau")]
    pub tau: f64,
    /// Pick next actions with the online model and value them with the target model.
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

impl DqnHyperParams {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.num_actions > 0, "num_actions must be positive");
        ensure!(
            (0.0..=1.0).contains(&self.reward_discount),
            "reward_discount must lie in [0, 1]"
        );
        ensure!(
            self.target_update_frequency > 0,
            "target_update_frequency must be positive"
        );
        ensure!((0.0..=1.0).contains(&self.tau), "tau must lie in [0, 1]");
        Ok(())
    }
}

pub struct Dqn {
    model: LearningModel,
    target_model: LearningModel,
    optimizer: nn::Optimizer,
    hyper_params: DqnHyperParams,
    training_counter: usize,
    rng: StdRng,
}

impl Dqn {
    pub fn new(
        model: LearningModel,
        optimizer_params: &OptimizerParams,
        hyper_params: DqnHyperParams,
        seed: u64,
    ) -> Result<Self> {
        hyper_params.validate()?;
        ensure!(
            model.output_dim() == hyper_params.num_actions,
            "{} outputs {} values for {} actions",
            model.name(),
            model.output_dim(),
            hyper_params.num_actions
        );

        let target_model = model.try_clone()?;
        let optimizer = optimizer_params.build(model.var_store())?;

        Ok(Dqn {
            model,
            target_model,
            optimizer,
            hyper_params,
            training_counter: 0,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn hyper_params(&self) -> &DqnHyperParams {
        &self.hyper_params
    }

    pub fn target_model(&self) -> &LearningModel {
        &self.target_model
    }

    pub fn training_counter(&self) -> usize {
        self.training_counter
    }

    /// Keeps the target model in step after the online weights were replaced wholesale.
    pub fn sync_target(&mut self) -> Result<()> {
        self.target_model.copy_from(&self.model)
    }

    fn next_q_values(&self, next_states: &Tensor) -> Tensor {
        tch::no_grad(|| {
            let target_q = self.target_model.forward(next_states, false);
            if self.hyper_params.is_double {
                let next_actions = self.model.forward(next_states, false).argmax(1, true);
                target_q.gather(1, &next_actions, false).squeeze_dim(1)
            } else {
                target_q.max_dim(1, false).0
            }
        })
    }
}

impl Algorithm for Dqn {
    type Batch = ExperienceSet;
    /// Per-sample loss, in batch order.
    type Output = Vec<f32>;

    fn model(&self) -> &LearningModel {
        &self.model
    }

    fn model_mut(&mut self) -> &mut LearningModel {
        &mut self.model
    }

    fn choose_action(&mut self, state: &[f32], epsilon: Option<f32>) -> Result<i64> {
        ensure!(
            state.len() == self.model.input_dim(),
            "state has {} features, {} expects {}",
            state.len(),
            self.model.name(),
            self.model.input_dim()
        );

        if let Some(epsilon) = epsilon {
            if self.rng.random::<f32>() < epsilon {
                // 探索
                return Ok(self.rng.random_range(0..self.hyper_params.num_actions as i64));
            }
        }

        let state = state.to_tensor()?;
        let q_values = tch::no_grad(|| self.model.forward(&state, false));
        Ok(q_values.f_argmax(1, false)?.f_int64_value(&[0])?)
    }

    fn train(&mut self, batch: &ExperienceSet) -> Result<Vec<f32>> {
        batch.validate()?;
        ensure!(!batch.is_empty(), "cannot train on an empty batch");
        let num_actions = self.hyper_params.num_actions as i64;
        ensure!(
            batch.actions.iter().all(|a| (0..num_actions).contains(a)),
            "batch holds actions outside [0, {num_actions})"
        );

        let device = self.model.device();
        let states = batch.states.to_tensor()?.to_device(device);
        let next_states = batch.next_states.to_tensor()?.to_device(device);
        let actions = Tensor::from_slice(&batch.actions).to_device(device).unsqueeze(1);
        let rewards = Tensor::from_slice(&batch.rewards).to_device(device);

        // Compute current Q values
        let q_values = self
            .model
            .forward(&states, true)
            .gather(1, &actions, false)
            .squeeze_dim(1);

        // Compute target Q values (no gradient)
        let next_q_values = self.next_q_values(&next_states);
        let discount = f64::from(self.hyper_params.reward_discount);
        let target_q_values = (&rewards + next_q_values * discount).detach();

        let loss = q_values.smooth_l1_loss(&target_q_values, Reduction::None, 1.0);
        self.optimizer.backward_step(&loss.mean(Kind::Float));

        self.training_counter += 1;
        if self.training_counter % self.hyper_params.target_update_frequency == 0 {
            self.target_model
                .soft_update(&self.model, self.hyper_params.tau)?;
            debug!(
                "{}: soft-updated target model after {} training rounds",
                self.model.name(),
                self.training_counter
            );
        }

        let loss = loss.detach().to_device(Device::Cpu);
        Ok(Vec::<f32>::try_from(&loss)?)
    }
}
