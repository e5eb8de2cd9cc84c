use std::collections::BTreeMap;

use crate::environment::Performance;
use crate::networks::ModelParameters;
use crate::storage::ExperienceSet;

/// What a learner asks of its actors for one episode.
#[derive(Debug, Clone)]
pub struct RollOutRequest {
    pub episode: usize,
    /// Weights to load before rolling out, keyed by agent id.
    pub parameters: Option<BTreeMap<String, ModelParameters>>,
    /// `None` rolls out greedily.
    pub epsilon: Option<BTreeMap<String, f32>>,
    pub return_experiences: bool,
}

#[derive(Debug)]
pub enum ActorMessage {
    RollOut(RollOutRequest),
    Exit,
}

#[derive(Debug)]
pub struct RollOutResult<M> {
    pub actor: String,
    pub episode: usize,
    pub metrics: M,
    pub experiences: Option<BTreeMap<String, ExperienceSet>>,
}

/// Replies of every actor that took part in a roll-out.
#[derive(Debug)]
pub struct GatheredRollOut<M> {
    pub metrics: BTreeMap<String, M>,
    /// Experiences of all actors, concatenated per agent.
    pub experiences: Option<BTreeMap<String, ExperienceSet>>,
}

impl<M: Performance> GatheredRollOut<M> {
    pub fn gather(results: Vec<RollOutResult<M>>) -> Self {
        let mut metrics = BTreeMap::new();
        let mut experiences: Option<BTreeMap<String, ExperienceSet>> = None;
        for result in results {
            if let Some(by_agent) = result.experiences {
                let merged = experiences.get_or_insert_with(BTreeMap::new);
                for (agent_id, set) in by_agent {
                    merged.entry(agent_id).or_default().extend(set);
                }
            }
            metrics.insert(result.actor, result.metrics);
        }
        GatheredRollOut {
            metrics,
            experiences,
        }
    }

    /// Mean score over the actors.
    pub fn performance(&self) -> f64 {
        if self.metrics.is_empty() {
            return 0.0;
        }
        self.metrics.values().map(Performance::score).sum::<f64>() / self.metrics.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Score(f64);

    impl Performance for Score {
        fn score(&self) -> f64 {
            self.0
        }
    }

    fn set(n: usize) -> ExperienceSet {
        let mut set = ExperienceSet::default();
        for i in 0..n {
            set.push(vec![i as f32], 0, 0.0, vec![i as f32 + 1.0]);
        }
        set
    }

    #[test]
    fn gather_concatenates_experiences_per_agent() {
        let results = vec![
            RollOutResult {
                actor: "actor_0".to_string(),
                episode: 3,
                metrics: Score(0.5),
                experiences: Some(BTreeMap::from([
                    ("port_a".to_string(), set(2)),
                    ("port_b".to_string(), set(1)),
                ])),
            },
            RollOutResult {
                actor: "actor_1".to_string(),
                episode: 3,
                metrics: Score(1.0),
                experiences: Some(BTreeMap::from([("port_a".to_string(), set(3))])),
            },
        ];
        let gathered = GatheredRollOut::gather(results);
        let experiences = gathered.experiences.as_ref().unwrap();
        assert_eq!(experiences["port_a"].len(), 5);
        assert_eq!(experiences["port_b"].len(), 1);
        assert!((gathered.performance() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn gather_without_experiences_keeps_none() {
        let gathered = GatheredRollOut::gather(vec![RollOutResult {
            actor: "actor_0".to_string(),
            episode: 0,
            metrics: Score(0.2),
            experiences: None,
        }]);
        assert!(gathered.experiences.is_none());
        assert_eq!(gathered.metrics.len(), 1);
    }
}
