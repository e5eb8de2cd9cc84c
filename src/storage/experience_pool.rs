use anyhow::{Context, Result, anyhow, ensure};
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// What to replace once the pool is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwriteType {
    /// Oldest entry first.
    #[default]
    Rolling,
    /// A uniformly chosen entry.
    Random,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperiencePoolConfig {
    /// `None` keeps every experience.
    #[serde(default)]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub overwrite_type: OverwriteType,
}

impl Default for ExperiencePoolConfig {
    fn default() -> Self {
        Self {
            capacity: Some(10_000),
            overwrite_type: OverwriteType::Rolling,
        }
    }
}

/// Column-oriented batch of transitions. Every non-empty column has one entry per transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperienceSet {
    pub states: Vec<Vec<f32>>,
    pub actions: Vec<i64>,
    pub rewards: Vec<f32>,
    pub next_states: Vec<Vec<f32>>,
    /// Sampling weights; may stay empty until the set is stored.
    pub losses: Vec<f32>,
}

impl ExperienceSet {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn push(&mut self, state: Vec<f32>, action: i64, reward: f32, next_state: Vec<f32>) {
        self.states.push(state);
        self.actions.push(action);
        self.rewards.push(reward);
        self.next_states.push(next_state);
    }

    /// Checks that the transition columns line up, and the loss column too when present.
    pub fn validate(&self) -> Result<()> {
        let n = self.len();
        ensure!(
            self.actions.len() == n && self.rewards.len() == n && self.next_states.len() == n,
            "column lengths differ: states {n}, actions {}, rewards {}, next_states {}",
            self.actions.len(),
            self.rewards.len(),
            self.next_states.len()
        );
        ensure!(
            self.losses.is_empty() || self.losses.len() == n,
            "loss column has {} entries for {n} transitions",
            self.losses.len()
        );
        Ok(())
    }

    /// Sets every transition's loss to `loss`.
    pub fn with_loss(mut self, loss: f32) -> Self {
        self.losses = vec![loss; self.len()];
        self
    }

    pub fn extend(&mut self, other: ExperienceSet) {
        self.states.extend(other.states);
        self.actions.extend(other.actions);
        self.rewards.extend(other.rewards);
        self.next_states.extend(other.next_states);
        self.losses.extend(other.losses);
    }
}

/// Bounded transition store that samples in proportion to each entry's last training loss.
pub struct ExperiencePool {
    capacity: Option<usize>,
    overwrite_type: OverwriteType,
    data: ExperienceSet,
    cursor: usize,
    rng: StdRng,
}

impl ExperiencePool {
    pub fn new(config: &ExperiencePoolConfig, seed: u64) -> Result<Self> {
        ensure!(config.capacity != Some(0), "experience pool capacity must be positive");
        Ok(ExperiencePool {
            capacity: config.capacity,
            overwrite_type: config.overwrite_type,
            data: ExperienceSet::default(),
            cursor: 0,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data = ExperienceSet::default();
        self.cursor = 0;
    }

    fn next_slot(&mut self) -> Option<usize> {
        match self.capacity {
            Some(capacity) if self.len() >= capacity => Some(match self.overwrite_type {
                OverwriteType::Rolling => {
                    let slot = self.cursor;
                    self.cursor = (self.cursor + 1) % capacity;
                    slot
                }
                OverwriteType::Random => self.rng.random_range(0..capacity),
            }),
            _ => None,
        }
    }

    /// Stores `experiences` and returns the slot each transition landed in.
    pub fn put(&mut self, experiences: ExperienceSet) -> Result<Vec<usize>> {
        experiences.validate()?;
        ensure!(
            experiences.losses.len() == experiences.len(),
            "experiences need a loss column before they can be stored"
        );

        let mut indexes = Vec::with_capacity(experiences.len());
        let rows = experiences
            .states
            .into_iter()
            .zip(experiences.actions)
            .zip(experiences.rewards)
            .zip(experiences.next_states)
            .zip(experiences.losses);
        for ((((state, action), reward), next_state), loss) in rows {
            let slot = match self.next_slot() {
                Some(slot) => {
                    self.data.states[slot] = state;
                    self.data.actions[slot] = action;
                    self.data.rewards[slot] = reward;
                    self.data.next_states[slot] = next_state;
                    self.data.losses[slot] = loss;
                    slot
                }
                None => {
                    self.data.push(state, action, reward, next_state);
                    self.data.losses.push(loss);
                    self.data.len() - 1
                }
            };
            indexes.push(slot);
        }
        Ok(indexes)
    }

    pub fn get(&self, indexes: &[usize]) -> Result<ExperienceSet> {
        let mut batch = ExperienceSet::default();
        for &i in indexes {
            ensure!(i < self.len(), "index {i} out of range for pool of {}", self.len());
            batch.push(
                self.data.states[i].clone(),
                self.data.actions[i],
                self.data.rewards[i],
                self.data.next_states[i].clone(),
            );
            batch.losses.push(self.data.losses[i]);
        }
        Ok(batch)
    }

    pub fn update_losses(&mut self, indexes: &[usize], losses: &[f32]) -> Result<()> {
        ensure!(
            indexes.len() == losses.len(),
            "{} indexes but {} losses",
            indexes.len(),
            losses.len()
        );
        for (&i, &loss) in indexes.iter().zip(losses) {
            let slot = self
                .data
                .losses
                .get_mut(i)
                .ok_or_else(|| anyhow!("index {i} out of range"))?;
            *slot = loss;
        }
        Ok(())
    }

    /// Samples `size` transitions with replacement, uniformly.
    pub fn sample(&mut self, size: usize) -> Result<(Vec<usize>, ExperienceSet)> {
        ensure!(!self.is_empty(), "cannot sample from an empty pool");
        let n = self.len();
        let indexes: Vec<usize> = (0..size).map(|_| self.rng.random_range(0..n)).collect();
        let batch = self.get(&indexes)?;
        Ok((indexes, batch))
    }

    /// Samples `size` transitions with replacement, each with probability proportional to its loss.
    pub fn sample_by_loss(&mut self, size: usize) -> Result<(Vec<usize>, ExperienceSet)> {
        ensure!(!self.is_empty(), "cannot sample from an empty pool");
        let dist = WeightedIndex::new(&self.data.losses).context("invalid loss weights")?;
        let indexes: Vec<usize> = (0..size).map(|_| dist.sample(&mut self.rng)).collect();
        let batch = self.get(&indexes)?;
        Ok((indexes, batch))
    }
}
