//! Actor/learner training: actors roll episodes out, the learner trains on their experiences.
pub mod actor;
pub mod learner;
pub mod message;
pub mod proxy;

pub use actor::{Actor, ActorHandle, LocalActor};
pub use learner::SimpleLearner;
pub use message::{ActorMessage, GatheredRollOut, RollOutRequest, RollOutResult};
pub use proxy::{ActorProxy, ProxyParams};
