pub mod fc_net;
pub mod learning_model;

pub use fc_net::{Activation, FcNetConfig, FullyConnectedNet};
pub use learning_model::{LearningModel, ModelParameters};
