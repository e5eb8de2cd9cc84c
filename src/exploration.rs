//! Epsilon schedules for value-based agents.
use std::collections::BTreeMap;

use anyhow::{Result, anyhow, ensure};
use serde::{Deserialize, Serialize};

/// Key whose entry applies to every agent without an entry of its own.
pub const ALL_AGENTS: &str = "_all_";

pub trait Explorer: Send {
    /// Exploration rate of every agent for the coming episode.
    fn epsilon(&self) -> &BTreeMap<String, f32>;

    /// Advances the schedule by one episode.
    fn update(&mut self, performance: Option<f64>);
}

/// Values for the exploration section of the configuration, applied to all agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationConfig {
    /// `(min, max)`
    pub epsilon_range: (f32, f32),
    /// `(fraction of episodes, epsilon at that point)`
    pub split_point: (f32, f32),
    #[serde(default = "default_with_cache")]
    pub with_cache: bool,
}

fn default_with_cache() -> bool {
    true
}

impl ExplorationConfig {
    pub fn epsilon_range_dict(&self) -> BTreeMap<String, (f32, f32)> {
        BTreeMap::from([(ALL_AGENTS.to_string(), self.epsilon_range)])
    }

    pub fn split_point_dict(&self) -> BTreeMap<String, (f32, f32)> {
        BTreeMap::from([(ALL_AGENTS.to_string(), self.split_point)])
    }
}

fn lookup<'a, T>(dict: &'a BTreeMap<String, T>, agent_id: &str, what: &str) -> Result<&'a T> {
    dict.get(agent_id)
        .or_else(|| dict.get(ALL_AGENTS))
        .ok_or_else(|| anyhow!("no {what} for agent '{agent_id}' and no '{ALL_AGENTS}' default"))
}

fn check_range(agent_id: &str, (min, max): (f32, f32)) -> Result<()> {
    ensure!(
        (0.0..=1.0).contains(&min) && (0.0..=1.0).contains(&max) && min <= max,
        "epsilon range ({min}, {max}) of agent '{agent_id}' must satisfy 0 <= min <= max <= 1"
    );
    Ok(())
}

/// Shared bookkeeping: episode counter, current map and optional history.
struct Schedule {
    total_episodes: usize,
    episode: usize,
    current: BTreeMap<String, f32>,
    cache: Option<Vec<BTreeMap<String, f32>>>,
}

impl Schedule {
    fn new(total_episodes: usize, with_cache: bool) -> Result<Self> {
        ensure!(total_episodes > 0, "total_episodes must be positive");
        Ok(Schedule {
            total_episodes,
            episode: 0,
            current: BTreeMap::new(),
            cache: with_cache.then(Vec::new),
        })
    }

    fn set(&mut self, current: BTreeMap<String, f32>) {
        if let Some(cache) = &mut self.cache {
            cache.push(current.clone());
        }
        self.current = current;
    }

    fn advance(&mut self) -> bool {
        if self.episode + 1 < self.total_episodes {
            self.episode += 1;
            true
        } else {
            false
        }
    }
}

/// Decays each agent's epsilon linearly from `max` to `min` over the training episodes.
pub struct LinearExplorer {
    ranges: BTreeMap<String, (f32, f32)>,
    schedule: Schedule,
}

impl LinearExplorer {
    pub fn new(
        agent_ids: &[String],
        total_episodes: usize,
        epsilon_range_dict: &BTreeMap<String, (f32, f32)>,
        with_cache: bool,
    ) -> Result<Self> {
        let mut ranges = BTreeMap::new();
        for agent_id in agent_ids {
            let range = *lookup(epsilon_range_dict, agent_id, "epsilon range")?;
            check_range(agent_id, range)?;
            ranges.insert(agent_id.clone(), range);
        }
        let mut explorer = LinearExplorer {
            ranges,
            schedule: Schedule::new(total_episodes, with_cache)?,
        };
        explorer.refresh();
        Ok(explorer)
    }

    pub fn epsilon_history(&self) -> Option<&[BTreeMap<String, f32>]> {
        self.schedule.cache.as_deref()
    }

    fn refresh(&mut self) {
        let span = (self.schedule.total_episodes - 1).max(1) as f32;
        let progress = self.schedule.episode as f32 / span;
        let current = self
            .ranges
            .iter()
            .map(|(id, &(min, max))| (id.clone(), max - (max - min) * progress))
            .collect();
        self.schedule.set(current);
    }
}

impl Explorer for LinearExplorer {
    fn epsilon(&self) -> &BTreeMap<String, f32> {
        &self.schedule.current
    }

    fn update(&mut self, _performance: Option<f64>) {
        if self.schedule.advance() {
            self.refresh();
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TwoPhase {
    min: f32,
    max: f32,
    split_episode: usize,
    split_epsilon: f32,
}

impl TwoPhase {
    fn at(&self, episode: usize, total_episodes: usize) -> f32 {
        if episode < self.split_episode {
            let progress = episode as f32 / self.split_episode as f32;
            self.max - (self.max - self.split_epsilon) * progress
        } else {
            let span = (total_episodes - 1).saturating_sub(self.split_episode).max(1);
            let progress = (episode - self.split_episode) as f32 / span as f32;
            let eps = self.split_epsilon - (self.split_epsilon - self.min) * progress;
            eps.max(self.min)
        }
    }
}

/// Two linear schedules joined at a split point: `max` down to the split epsilon over the first
/// part of training, then down to `min` by the last episode.
pub struct TwoPhaseLinearExplorer {
    phases: BTreeMap<String, TwoPhase>,
    schedule: Schedule,
}

impl TwoPhaseLinearExplorer {
    pub fn new(
        agent_ids: &[String],
        total_episodes: usize,
        epsilon_range_dict: &BTreeMap<String, (f32, f32)>,
        split_point_dict: &BTreeMap<String, (f32, f32)>,
        with_cache: bool,
    ) -> Result<Self> {
        let schedule = Schedule::new(total_episodes, with_cache)?;

        let mut phases = BTreeMap::new();
        for agent_id in agent_ids {
            let (min, max) = *lookup(epsilon_range_dict, agent_id, "epsilon range")?;
            check_range(agent_id, (min, max))?;
            let (fraction, split_epsilon) = *lookup(split_point_dict, agent_id, "split point")?;
            ensure!(
                fraction > 0.0 && fraction < 1.0,
                "split fraction {fraction} of agent '{agent_id}' must lie in (0, 1)"
            );
            ensure!(
                (min..=max).contains(&split_epsilon),
                "split epsilon {split_epsilon} of agent '{agent_id}' is outside ({min}, {max})"
            );
            let split_episode = ((fraction * total_episodes as f32) as usize).max(1);
            phases.insert(
                agent_id.clone(),
                TwoPhase {
                    min,
                    max,
                    split_episode,
                    split_epsilon,
                },
            );
        }

        let mut explorer = TwoPhaseLinearExplorer { phases, schedule };
        explorer.refresh();
        Ok(explorer)
    }

    pub fn from_config(
        agent_ids: &[String],
        total_episodes: usize,
        config: &ExplorationConfig,
    ) -> Result<Self> {
        Self::new(
            agent_ids,
            total_episodes,
            &config.epsilon_range_dict(),
            &config.split_point_dict(),
            config.with_cache,
        )
    }

    pub fn epsilon_history(&self) -> Option<&[BTreeMap<String, f32>]> {
        self.schedule.cache.as_deref()
    }

    fn refresh(&mut self) {
        let (episode, total) = (self.schedule.episode, self.schedule.total_episodes);
        let current = self
            .phases
            .iter()
            .map(|(id, phase)| (id.clone(), phase.at(episode, total)))
            .collect();
        self.schedule.set(current);
    }
}

impl Explorer for TwoPhaseLinearExplorer {
    fn epsilon(&self) -> &BTreeMap<String, f32> {
        &self.schedule.current
    }

    fn update(&mut self, _performance: Option<f64>) {
        if self.schedule.advance() {
            self.refresh();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> Vec<String> {
        vec!["port_a".to_string(), "port_b".to_string()]
    }

    fn all(value: (f32, f32)) -> BTreeMap<String, (f32, f32)> {
        BTreeMap::from([(ALL_AGENTS.to_string(), value)])
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn two_phase_schedule_hits_max_split_and_min() {
        let mut explorer =
            TwoPhaseLinearExplorer::new(&ids(), 11, &all((0.0, 0.4)), &all((0.5, 0.2)), true)
                .unwrap();

        let mut seen = Vec::new();
        for _ in 0..11 {
            seen.push(explorer.epsilon()["port_a"]);
            explorer.update(None);
        }

        assert!(close(seen[0], 0.4));
        // split episode is 5
        assert!(close(seen[5], 0.2));
        assert!(close(seen[10], 0.0));
        assert!(seen.windows(2).all(|w| w[1] <= w[0] + 1e-6));
        // the schedule stays put once it reaches the last episode
        assert!(close(explorer.epsilon()["port_b"], 0.0));
    }

    #[test]
    fn agent_specific_entries_override_the_default() {
        let mut ranges = all((0.0, 0.4));
        ranges.insert("port_b".to_string(), (0.1, 0.8));
        let mut splits = all((0.5, 0.2));
        splits.insert("port_b".to_string(), (0.25, 0.5));

        let explorer = TwoPhaseLinearExplorer::new(&ids(), 8, &ranges, &splits, false).unwrap();
        assert!(close(explorer.epsilon()["port_a"], 0.4));
        assert!(close(explorer.epsilon()["port_b"], 0.8));
        assert!(explorer.epsilon_history().is_none());
    }

    #[test]
    fn cache_records_every_generated_map() {
        let mut explorer =
            TwoPhaseLinearExplorer::new(&ids(), 4, &all((0.0, 0.4)), &all((0.5, 0.2)), true)
                .unwrap();
        explorer.update(Some(0.5));
        explorer.update(Some(0.6));
        let history = explorer.epsilon_history().unwrap();
        assert_eq!(history.len(), 3);
        assert!(close(history[0]["port_a"], 0.4));
    }

    #[test]
    fn invalid_schedules_are_rejected() {
        let missing = BTreeMap::from([("port_a".to_string(), (0.0, 0.4))]);
        assert!(
            TwoPhaseLinearExplorer::new(&ids(), 10, &missing, &all((0.5, 0.2)), true).is_err()
        );
        assert!(
            TwoPhaseLinearExplorer::new(&ids(), 10, &all((0.5, 0.4)), &all((0.5, 0.45)), true)
                .is_err()
        );
        assert!(
            TwoPhaseLinearExplorer::new(&ids(), 10, &all((0.0, 0.4)), &all((1.0, 0.2)), true)
                .is_err()
        );
        assert!(
            TwoPhaseLinearExplorer::new(&ids(), 10, &all((0.0, 0.4)), &all((0.5, 0.6)), true)
                .is_err()
        );
        assert!(
            TwoPhaseLinearExplorer::new(&ids(), 0, &all((0.0, 0.4)), &all((0.5, 0.2)), true)
                .is_err()
        );
    }

    #[test]
    fn linear_schedule_decays_to_min() {
        let mut explorer = LinearExplorer::new(&ids(), 5, &all((0.1, 0.5)), true).unwrap();
        assert!(close(explorer.epsilon()["port_a"], 0.5));
        for _ in 0..4 {
            explorer.update(None);
        }
        assert!(close(explorer.epsilon()["port_a"], 0.1));
        assert_eq!(explorer.epsilon_history().unwrap().len(), 5);
    }
}
