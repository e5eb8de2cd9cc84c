use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use tch::{Kind, Tensor, nn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    #[default]
    LeakyRelu,
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn apply(self, xs: &Tensor) -> Tensor {
        match self {
            Activation::Relu => xs.relu(),
            Activation::LeakyRelu => xs.leaky_relu(),
            Activation::Tanh => xs.tanh(),
            Activation::Sigmoid => xs.sigmoid(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FcNetConfig {
    pub name: String,
    pub input_dim: usize,
    pub output_dim: usize,
    /// One block per entry; empty means the head maps input straight to output.
    #[serde(default)]
    pub hidden_dims: Vec<usize>,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default)]
    pub softmax: bool,
    #[serde(default)]
    pub batch_norm: bool,
    #[serde(default)]
    pub skip_connection: bool,
    #[serde(default)]
    pub dropout_p: f64,
}

impl FcNetConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.input_dim > 0, "{}: input_dim must be positive", self.name);
        ensure!(self.output_dim > 0, "{}: output_dim must be positive", self.name);
        ensure!(
            self.hidden_dims.iter().all(|&d| d > 0),
            "{}: hidden dims must be positive",
            self.name
        );
        ensure!(
            (0.0..1.0).contains(&self.dropout_p),
            "{}: dropout_p must lie in [0, 1)",
            self.name
        );
        ensure!(
            !self.skip_connection || self.input_dim == self.output_dim,
            "{}: skip connection needs input_dim == output_dim ({} != {})",
            self.name,
            self.input_dim,
            self.output_dim
        );
        Ok(())
    }
}

/// Stack of `[BatchNorm] -> Linear -> activation -> [Dropout]` blocks followed by a linear head.
#[derive(Debug)]
pub struct FullyConnectedNet {
    name: String,
    input_dim: usize,
    output_dim: usize,
    layers: nn::SequentialT,
    head: nn::Linear,
    softmax: bool,
    skip_connection: bool,
}

impl FullyConnectedNet {
    pub fn new(path: &nn::Path, config: &FcNetConfig) -> Result<Self> {
        config.validate()?;

        let mut layers = nn::seq_t();
        let mut in_dim = config.input_dim as i64;
        for (i, &hidden_dim) in config.hidden_dims.iter().enumerate() {
            let block = path / format!("block{i}");
            if config.batch_norm {
                layers = layers.add(nn::batch_norm1d(&block / "bn", in_dim, Default::default()));
            }
            layers = layers.add(nn::linear(
                &block / "linear",
                in_dim,
                hidden_dim as i64,
                Default::default(),
            ));
            let activation = config.activation;
            layers = layers.add_fn(move |xs| activation.apply(xs));
            if config.dropout_p > 0.0 {
                let p = config.dropout_p;
                layers = layers.add_fn_t(move |xs, train| xs.dropout(p, train));
            }
            in_dim = hidden_dim as i64;
        }

        let head = nn::linear(
            path / "head",
            in_dim,
            config.output_dim as i64,
            Default::default(),
        );

        Ok(FullyConnectedNet {
            name: config.name.clone(),
            input_dim: config.input_dim,
            output_dim: config.output_dim,
            layers,
            head,
            softmax: config.softmax,
            skip_connection: config.skip_connection,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }
}

impl nn::ModuleT for FullyConnectedNet {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let mut out = xs.apply_t(&self.layers, train).apply(&self.head);
        if self.skip_connection {
            out = out + xs;
        }
        if self.softmax {
            out = out.softmax(1, Kind::Float);
        }
        out
    }
}
