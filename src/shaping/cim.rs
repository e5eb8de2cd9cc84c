use std::collections::BTreeMap;

use anyhow::{Result, anyhow, ensure};
use serde::{Deserialize, Serialize};

use super::{ActionShaper, ExperienceShaper, StateShaper, TransitionRecord};
use crate::environments::cim::{
    Action, CimEnv, DecisionEvent, PortAttribute, PortSnapshot, VesselAttribute,
};
use crate::storage::ExperienceSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateShapingConfig {
    pub look_back: usize,
    pub max_ports_downstream: usize,
    pub port_attributes: Vec<PortAttribute>,
    pub vessel_attributes: Vec<VesselAttribute>,
}

impl StateShapingConfig {
    /// Model input size implied by these settings.
    pub fn input_dim(&self) -> usize {
        (self.look_back + 1) * (self.max_ports_downstream + 1) * self.port_attributes.len()
            + self.vessel_attributes.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperienceShapingConfig {
    /// Ticks after a decision whose outcome is credited to it.
    pub time_window: usize,
    pub time_decay_factor: f32,
    pub fulfillment_factor: f32,
    pub shortage_factor: f32,
}

impl Default for ExperienceShapingConfig {
    fn default() -> Self {
        Self {
            time_window: 100,
            time_decay_factor: 0.97,
            fulfillment_factor: 1.0,
            shortage_factor: 1.0,
        }
    }
}

/// Port attributes over a look-back window for the current and downstream ports, followed by the
/// calling vessel's attributes. Missing ticks and ports read as zero.
pub struct CimStateShaper {
    config: StateShapingConfig,
}

impl CimStateShaper {
    pub fn new(config: StateShapingConfig) -> Result<Self> {
        ensure!(
            !config.port_attributes.is_empty() || !config.vessel_attributes.is_empty(),
            "state shaping needs at least one attribute"
        );
        Ok(CimStateShaper { config })
    }
}

impl StateShaper<CimEnv> for CimStateShaper {
    fn dim(&self) -> usize {
        self.config.input_dim()
    }

    fn shape(&self, event: &DecisionEvent, env: &CimEnv) -> Result<Vec<f32>> {
        let snapshots = env.snapshots();
        let mut ports = vec![Some(event.port_idx)];
        let downstream = env.downstream_ports(event.vessel_idx, self.config.max_ports_downstream);
        ports.extend(downstream.into_iter().map(Some));
        ports.resize(self.config.max_ports_downstream + 1, None);

        let mut state = Vec::with_capacity(self.dim());
        let first_tick = event.tick as isize - self.config.look_back as isize;
        for tick in first_tick..=event.tick as isize {
            for port in &ports {
                let snapshot = match (usize::try_from(tick), port) {
                    (Ok(tick), Some(port_idx)) => snapshots.port(tick, *port_idx).copied(),
                    _ => None,
                }
                .unwrap_or_default();
                state.extend(
                    self.config
                        .port_attributes
                        .iter()
                        .map(|&attr| snapshot.attribute(attr)),
                );
            }
        }

        let vessel = snapshots
            .vessel(event.tick, event.vessel_idx)
            .ok_or_else(|| anyhow!("no snapshot of vessel {} at tick {}", event.vessel_idx, event.tick))?;
        state.extend(
            self.config
                .vessel_attributes
                .iter()
                .map(|&attr| vessel.attribute(attr)),
        );

        debug_assert_eq!(state.len(), self.dim());
        Ok(state)
    }
}

/// Maps action index `i` of `n` to the fraction `-1 + 2i/(n-1)` of the legal scope; negative
/// fractions load empties onto the vessel, positive ones discharge them.
pub struct CimActionShaper {
    num_actions: usize,
}

impl CimActionShaper {
    pub fn new(num_actions: usize) -> Result<Self> {
        ensure!(num_actions > 0, "num_actions must be positive");
        Ok(CimActionShaper { num_actions })
    }

    pub fn fraction(&self, action_index: usize) -> f64 {
        if self.num_actions == 1 {
            return 0.0;
        }
        -1.0 + 2.0 * action_index as f64 / (self.num_actions - 1) as f64
    }
}

impl ActionShaper<CimEnv> for CimActionShaper {
    fn shape(&self, action_index: i64, event: &DecisionEvent, _env: &CimEnv) -> Result<Action> {
        let index = usize::try_from(action_index)
            .ok()
            .filter(|&i| i < self.num_actions)
            .ok_or_else(|| anyhow!("action index {action_index} outside [0, {})", self.num_actions))?;

        let fraction = self.fraction(index);
        let scope = event.action_scope;
        let quantity = if fraction < 0.0 {
            -((-fraction * scope.load as f64).floor() as i64)
        } else {
            (fraction * scope.discharge as f64).floor() as i64
        };

        Ok(Action {
            vessel_idx: event.vessel_idx,
            port_idx: event.port_idx,
            quantity,
        })
    }
}

/// Credits each decision with the discounted fulfilment and shortage seen at its port over a
/// fixed window of following ticks.
pub struct TruncatedExperienceShaper {
    config: ExperienceShapingConfig,
    records: Vec<TransitionRecord<DecisionEvent>>,
}

impl TruncatedExperienceShaper {
    pub fn new(config: ExperienceShapingConfig) -> Result<Self> {
        ensure!(
            (0.0..=1.0).contains(&config.time_decay_factor),
            "time_decay_factor must lie in [0, 1]"
        );
        Ok(TruncatedExperienceShaper {
            config,
            records: Vec::new(),
        })
    }

    fn reward(&self, event: &DecisionEvent, env: &CimEnv) -> f32 {
        let snapshots = env.snapshots();
        let mut reward = 0.0;
        let mut decay = 1.0;
        for tick in event.tick + 1..=event.tick + self.config.time_window {
            let Some(PortSnapshot {
                fulfillment,
                shortage,
                ..
            }) = snapshots.port(tick, event.port_idx)
            else {
                break;
            };
            reward += decay
                * (self.config.fulfillment_factor * *fulfillment as f32
                    - self.config.shortage_factor * *shortage as f32);
            decay *= self.config.time_decay_factor;
        }
        reward
    }
}

impl ExperienceShaper<CimEnv> for TruncatedExperienceShaper {
    fn record(&mut self, transition: TransitionRecord<DecisionEvent>) {
        self.records.push(transition);
    }

    fn shape(&mut self, env: &CimEnv) -> Result<BTreeMap<String, ExperienceSet>> {
        let records = std::mem::take(&mut self.records);

        let mut by_agent: BTreeMap<String, Vec<(TransitionRecord<DecisionEvent>, f32)>> =
            BTreeMap::new();
        for record in records {
            let reward = self.reward(&record.event, env);
            by_agent
                .entry(record.agent_id.clone())
                .or_default()
                .push((record, reward));
        }

        let mut experiences = BTreeMap::new();
        for (agent_id, transitions) in by_agent {
            let mut set = ExperienceSet::default();
            for pair in transitions.windows(2) {
                let (current, reward) = &pair[0];
                let (next, _) = &pair[1];
                set.push(
                    current.state.clone(),
                    current.action,
                    *reward,
                    next.state.clone(),
                );
            }
            if !set.is_empty() {
                experiences.insert(agent_id, set);
            }
        }
        Ok(experiences)
    }

    fn reset(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use crate::environments::cim::{ActionScope, CIM_SCENARIO, EnvConfig, TOY_4P_SSDD, TopologySpec};

    fn env(durations: usize) -> CimEnv {
        CimEnv::new(&EnvConfig {
            scenario: CIM_SCENARIO.to_string(),
            topology: TopologySpec::Builtin(TOY_4P_SSDD.to_string()),
            durations,
            seed: 1,
        })
        .unwrap()
    }

    fn state_config() -> StateShapingConfig {
        StateShapingConfig {
            look_back: 3,
            max_ports_downstream: 2,
            port_attributes: vec![
                PortAttribute::Empty,
                PortAttribute::Full,
                PortAttribute::Shortage,
            ],
            vessel_attributes: vec![VesselAttribute::Empty, VesselAttribute::RemainingSpace],
        }
    }

    #[test]
    fn input_dim_follows_the_shaping_formula() {
        assert_eq!(state_config().input_dim(), 4 * 3 * 3 + 2);
    }

    #[test]
    fn shaped_states_have_the_configured_length() {
        let shaper = CimStateShaper::new(state_config()).unwrap();
        let mut env = env(50);
        let mut result = env.step(None).unwrap();
        let mut checked = 0;
        while let Some(event) = result.decision_event {
            let state = shaper.shape(&event, &env).unwrap();
            assert_eq!(state.len(), shaper.dim());
            checked += 1;
            result = env.step(None).unwrap();
        }
        assert!(checked > 0);
    }

    #[test]
    fn early_ticks_are_zero_padded() {
        let shaper = CimStateShaper::new(state_config()).unwrap();
        let mut env = env(10);
        let event = env.step(None).unwrap().decision_event.unwrap();
        assert_eq!(event.tick, 0);
        let state = shaper.shape(&event, &env).unwrap();
        // three missing ticks of three ports with three attributes each
        assert!(state[..27].iter().all(|&v| v == 0.0));
        assert!(state[27] > 0.0);
    }

    #[test]
    fn action_indexes_map_onto_the_scope() {
        let shaper = CimActionShaper::new(5).unwrap();
        let env = env(10);
        let event = DecisionEvent {
            tick: 0,
            port_idx: 1,
            vessel_idx: 2,
            action_scope: ActionScope {
                load: 100,
                discharge: 40,
            },
        };
        let quantities: Vec<i64> = (0..5)
            .map(|i| shaper.shape(i, &event, &env).unwrap().quantity)
            .collect();
        assert_eq!(quantities, vec![-100, -50, 0, 20, 40]);
        assert!(shaper.shape(5, &event, &env).is_err());
        assert!(shaper.shape(-1, &event, &env).is_err());
    }

    #[test]
    fn experiences_chain_each_agents_states() {
        let mut env = env(80);
        let state_shaper = CimStateShaper::new(state_config()).unwrap();
        let mut shaper = TruncatedExperienceShaper::new(ExperienceShapingConfig::default()).unwrap();

        let mut decisions: BTreeMap<String, usize> = BTreeMap::new();
        let mut result = env.step(None).unwrap();
        while let Some(event) = result.decision_event {
            let agent_id = env.agent_of(&event);
            *decisions.entry(agent_id.clone()).or_default() += 1;
            shaper.record(TransitionRecord {
                agent_id,
                state: state_shaper.shape(&event, &env).unwrap(),
                action: 0,
                event,
            });
            result = env.step(None).unwrap();
        }

        let experiences = shaper.shape(&env).unwrap();
        assert!(!experiences.is_empty());
        for (agent_id, set) in &experiences {
            set.validate().unwrap();
            assert_eq!(set.len(), decisions[agent_id] - 1);
            for i in 1..set.len() {
                assert_eq!(set.next_states[i - 1], set.states[i]);
            }
        }
        assert!(shaper.shape(&env).unwrap().is_empty());
    }
}
