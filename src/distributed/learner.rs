use std::path::Path;

use anyhow::Result;
use log::{debug, info};

use super::actor::ActorHandle;
use super::message::RollOutRequest;
use crate::agent::Agent;
use crate::agent_manager::DqnAgentManager;
use crate::environment::Performance;

/// Drives training: ships the latest weights and exploration rates to the actors, trains on what
/// comes back.
pub struct SimpleLearner<A: Agent, H: ActorHandle> {
    agent_manager: DqnAgentManager<A>,
    actor: H,
    performance_history: Vec<f64>,
}

impl<A, H> SimpleLearner<A, H>
where
    A: Agent,
    H: ActorHandle,
    H::Metrics: Performance,
{
    pub fn new(agent_manager: DqnAgentManager<A>, actor: H) -> Self {
        SimpleLearner {
            agent_manager,
            actor,
            performance_history: Vec::new(),
        }
    }

    pub fn agent_manager(&self) -> &DqnAgentManager<A> {
        &self.agent_manager
    }

    /// Mean actor performance of every training episode so far.
    pub fn performance_history(&self) -> &[f64] {
        &self.performance_history
    }

    pub fn train(&mut self, total_episodes: usize) -> Result<()> {
        for episode in 0..total_episodes {
            let epsilon = self.agent_manager.epsilon().clone();
            let request = RollOutRequest {
                episode,
                parameters: Some(self.agent_manager.parameters()),
                epsilon: Some(epsilon.clone()),
                return_experiences: true,
            };
            let gathered = self.actor.roll_out(request)?;
            let performance = gathered.performance();
            info!("ep {episode} - performance: {performance:.4}, epsilon: {epsilon:?}");
            for (actor, metrics) in &gathered.metrics {
                debug!("ep {episode} - {actor}: {metrics:?}");
            }

            self.agent_manager
                .train(gathered.experiences.unwrap_or_default())?;
            self.agent_manager.update_epsilon(Some(performance));
            self.performance_history.push(performance);
        }
        Ok(())
    }

    /// Greedy roll-out with the current weights; returns the mean performance.
    pub fn test(&mut self) -> Result<f64> {
        let request = RollOutRequest {
            episode: self.performance_history.len(),
            parameters: Some(self.agent_manager.parameters()),
            epsilon: None,
            return_experiences: false,
        };
        let gathered = self.actor.roll_out(request)?;
        let performance = gathered.performance();
        info!("test - performance: {performance:.4}");
        for (actor, metrics) in &gathered.metrics {
            info!("test - {actor}: {metrics:?}");
        }
        Ok(performance)
    }

    pub fn dump_models(&self, dir: &Path) -> Result<()> {
        self.agent_manager.dump_models(dir)
    }

    pub fn exit(&mut self) -> Result<()> {
        self.actor.exit()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::agent::{CimAgent, model_path};
    use crate::agent_manager::AgentManagerMode;
    use crate::distributed::LocalActor;
    use crate::exploration::Explorer;
    use crate::testing::{Failure, TOY_AGENT, TOY_SCORE, ToyEnv, toy_actor, toy_agents};

    struct RecordingExplorer {
        epsilon: BTreeMap<String, f32>,
        updates: Arc<Mutex<Vec<Option<f64>>>>,
    }

    impl Explorer for RecordingExplorer {
        fn epsilon(&self) -> &BTreeMap<String, f32> {
            &self.epsilon
        }

        fn update(&mut self, performance: Option<f64>) {
            self.updates.lock().unwrap().push(performance);
        }
    }

    fn learner(updates: &Arc<Mutex<Vec<Option<f64>>>>) -> SimpleLearner<CimAgent, LocalActor<ToyEnv, CimAgent>> {
        let explorer = RecordingExplorer {
            epsilon: BTreeMap::from([(TOY_AGENT.to_string(), 0.5)]),
            updates: Arc::clone(updates),
        };
        let agent_manager =
            DqnAgentManager::new("learner", AgentManagerMode::Train, toy_agents(), Box::new(explorer));
        let actor = LocalActor::new(toy_actor("toy_actor", 5, Failure::None, None));
        SimpleLearner::new(agent_manager, actor)
    }

    #[test]
    fn train_feeds_performance_back_to_the_explorer() {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let mut learner = learner(&updates);
        learner.train(3).unwrap();

        assert_eq!(learner.performance_history(), [TOY_SCORE; 3]);
        assert_eq!(*updates.lock().unwrap(), vec![Some(TOY_SCORE); 3]);
        let agent = &learner.agent_manager().agents()[TOY_AGENT];
        assert_eq!(agent.experience_pool().len(), 3 * 4);
        assert_eq!(agent.algorithm().training_counter(), 3 * 2);
    }

    #[test]
    fn test_rolls_out_without_training() {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let mut learner = learner(&updates);
        assert_eq!(learner.test().unwrap(), TOY_SCORE);
        assert!(learner.performance_history().is_empty());
        assert!(updates.lock().unwrap().is_empty());
        assert!(learner.agent_manager().agents()[TOY_AGENT].experience_pool().is_empty());
    }

    #[test]
    fn dump_models_writes_one_file_per_agent() {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let mut learner = learner(&updates);
        learner.train(1).unwrap();
        let dir = tempfile::tempdir().unwrap();
        learner.dump_models(dir.path()).unwrap();
        assert!(model_path(dir.path(), TOY_AGENT).exists());
        learner.exit().unwrap();
    }
}
