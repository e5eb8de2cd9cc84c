use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, anyhow, ensure};
use tch::nn::ModuleT;
use tch::{Device, Tensor, nn};

use super::fc_net::{FcNetConfig, FullyConnectedNet};

/// Detached CPU copy of a model's variables, safe to ship to another thread.
#[derive(Debug)]
pub struct ModelParameters(BTreeMap<String, Tensor>);

impl ModelParameters {
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl Clone for ModelParameters {
    fn clone(&self) -> Self {
        ModelParameters(
            self.0
                .iter()
                .map(|(name, t)| (name.clone(), t.copy()))
                .collect(),
        )
    }
}

/// A network together with the `VarStore` that owns its weights.
pub struct LearningModel {
    config: FcNetConfig,
    net: FullyConnectedNet,
    var_store: nn::VarStore, // 👈 保存 VarStore 的所有权
}

impl LearningModel {
    pub fn new(config: &FcNetConfig, device: Device) -> Result<Self> {
        let var_store = nn::VarStore::new(device);
        let net = FullyConnectedNet::new(&var_store.root(), config)?;
        Ok(LearningModel {
            config: config.clone(),
            net,
            var_store,
        })
    }

    /// Same architecture on the same device, holding a copy of the current weights.
    pub fn try_clone(&self) -> Result<Self> {
        let mut model = LearningModel::new(&self.config, self.device())?;
        model.copy_from(self)?;
        Ok(model)
    }

    pub fn config(&self) -> &FcNetConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        self.net.name()
    }

    pub fn input_dim(&self) -> usize {
        self.net.input_dim()
    }

    pub fn output_dim(&self) -> usize {
        self.net.output_dim()
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.var_store
    }

    pub fn device(&self) -> Device {
        self.var_store.device()
    }

    pub fn forward(&self, xs: &Tensor, train: bool) -> Tensor {
        self.net.forward_t(&xs.to_device(self.device()), train)
    }

    pub fn parameters(&self) -> ModelParameters {
        let params = tch::no_grad(|| {
            self.var_store
                .variables()
                .into_iter()
                .map(|(name, t)| (name, t.detach().to_device(Device::Cpu).copy()))
                .collect()
        });
        ModelParameters(params)
    }

    /// Overwrites every variable with the tensor of the same name in `params`.
    pub fn load_parameters(&mut self, params: &ModelParameters) -> Result<()> {
        let variables = self.var_store.variables();
        ensure!(
            variables.len() == params.len(),
            "{}: expected {} tensors, got {}",
            self.name(),
            variables.len(),
            params.len()
        );
        for (name, mut var) in variables {
            let src = params
                .get(&name)
                .ok_or_else(|| anyhow!("{}: missing tensor '{name}'", self.name()))?;
            ensure!(
                var.size() == src.size(),
                "{}: shape mismatch for '{name}': {:?} vs {:?}",
                self.name(),
                var.size(),
                src.size()
            );
            tch::no_grad(|| var.f_copy_(src))?;
        }
        Ok(())
    }

    /// `self ← tau * other + (1 - tau) * self`, variable by variable.
    pub fn soft_update(&mut self, other: &LearningModel, tau: f64) -> Result<()> {
        ensure!((0.0..=1.0).contains(&tau), "tau must lie in [0, 1], got {tau}");
        let source = other.var_store.variables();
        for (name, mut var) in self.var_store.variables() {
            let src = source
                .get(&name)
                .ok_or_else(|| anyhow!("{}: missing tensor '{name}'", other.name()))?;
            tch::no_grad(|| {
                let mixed = src.to_device(var.device()) * tau + &var * (1.0 - tau);
                var.f_copy_(&mixed)
            })?;
        }
        Ok(())
    }

    pub fn copy_from(&mut self, other: &LearningModel) -> Result<()> {
        self.var_store.copy(&other.var_store)?;
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.var_store
            .save(path)
            .with_context(|| format!("saving {} to {}", self.name(), path.display()))
    }

    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let name = self.name().to_string();
        self.var_store
            .load(path)
            .with_context(|| format!("loading {name} from {}", path.display()))
    }
}
