//! Container inventory management: ports export laden containers, vessels carry them along
//! fixed routes, and each port's agent decides how many empties to load or discharge whenever a
//! vessel calls.
pub mod snapshot;
pub mod topology;

use std::collections::VecDeque;

use anyhow::{Result, bail, ensure};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::environment::{Environment, Performance, StepResult};

pub use snapshot::{PortAttribute, PortSnapshot, SnapshotList, VesselAttribute, VesselSnapshot};
pub use topology::{PortSpec, RouteSpec, RouteStop, TOY_4P_SSDD, Topology, TopologySpec, VesselSpec};

pub const CIM_SCENARIO: &str = "cim";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvConfig {
    pub scenario: String,
    pub topology: TopologySpec,
    /// Episode length in ticks.
    pub durations: usize,
    #[serde(default)]
    pub seed: u64,
}

/// Legal range of an action: at most `load` empties onto the vessel, at most `discharge` off it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionScope {
    pub load: u64,
    pub discharge: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionEvent {
    pub tick: usize,
    pub port_idx: usize,
    pub vessel_idx: usize,
    pub action_scope: ActionScope,
}

/// Positive `quantity` discharges empties to the port, negative loads them onto the vessel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub vessel_idx: usize,
    pub port_idx: usize,
    pub quantity: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub order_requirements: u64,
    pub container_shortage: u64,
    pub operation_number: u64,
}

impl Performance for Metrics {
    /// Fraction of orders fulfilled.
    fn score(&self) -> f64 {
        if self.order_requirements == 0 {
            return 1.0;
        }
        1.0 - self.container_shortage as f64 / self.order_requirements as f64
    }
}

#[derive(Debug, Clone)]
struct PortState {
    empty: u64,
    full: u64,
    capacity: u64,
    order_rate: f64,
    booking: u64,
    shortage: u64,
    fulfillment: u64,
}

impl PortState {
    fn free_space(&self) -> u64 {
        self.capacity.saturating_sub(self.empty + self.full)
    }

    fn snapshot(&self) -> PortSnapshot {
        PortSnapshot {
            empty: self.empty,
            full: self.full,
            booking: self.booking,
            shortage: self.shortage,
            fulfillment: self.fulfillment,
            capacity: self.capacity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VesselStatus {
    Sailing { remaining: usize },
    Docked,
}

#[derive(Debug, Clone)]
struct VesselState {
    empty: u64,
    full: u64,
    capacity: u64,
    route_idx: usize,
    stop_idx: usize,
    status: VesselStatus,
}

impl VesselState {
    fn remaining_space(&self) -> u64 {
        self.capacity.saturating_sub(self.empty + self.full)
    }
}

/// (port index, sailing ticks to the next stop)
type Route = Vec<(usize, usize)>;

pub struct CimEnv {
    topology: Topology,
    durations: usize,
    seed: u64,
    rng: StdRng,
    routes: Vec<Route>,
    ports: Vec<PortState>,
    vessels: Vec<VesselState>,
    /// Vessels waiting for a decision at the current tick.
    pending: VecDeque<usize>,
    snapshots: SnapshotList,
    metrics: Metrics,
    started: bool,
    done: bool,
}

impl CimEnv {
    pub fn new(config: &EnvConfig) -> Result<Self> {
        ensure!(
            config.scenario == CIM_SCENARIO,
            "unsupported scenario '{}', expected '{CIM_SCENARIO}'",
            config.scenario
        );
        ensure!(config.durations > 0, "durations must be positive");
        let topology = config.topology.resolve()?;

        let mut routes = Vec::with_capacity(topology.routes.len());
        for route in &topology.routes {
            let mut stops = Vec::with_capacity(route.stops.len());
            for stop in &route.stops {
                let Some(port_idx) = topology.port_index(&stop.port) else {
                    bail!("route '{}' calls at unknown port '{}'", route.name, stop.port);
                };
                stops.push((port_idx, stop.sailing_ticks));
            }
            routes.push(stops);
        }

        let mut env = CimEnv {
            durations: config.durations,
            seed: config.seed,
            rng: StdRng::seed_from_u64(config.seed),
            routes,
            ports: Vec::new(),
            vessels: Vec::new(),
            pending: VecDeque::new(),
            snapshots: SnapshotList::default(),
            metrics: Metrics::default(),
            started: false,
            done: false,
            topology,
        };
        env.reset();
        Ok(env)
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn durations(&self) -> usize {
        self.durations
    }

    pub fn snapshots(&self) -> &SnapshotList {
        &self.snapshots
    }

    /// Up to `count` ports the vessel calls at after its current stop, never repeating the
    /// current port.
    pub fn downstream_ports(&self, vessel_idx: usize, count: usize) -> Vec<usize> {
        let Some(vessel) = self.vessels.get(vessel_idx) else {
            return Vec::new();
        };
        let route = &self.routes[vessel.route_idx];
        let current = route[vessel.stop_idx].0;
        (1..route.len())
            .map(|offset| route[(vessel.stop_idx + offset) % route.len()].0)
            .filter(|&port_idx| port_idx != current)
            .take(count)
            .collect()
    }

    /// Total number of containers in the system, empty or laden.
    pub fn total_containers(&self) -> u64 {
        let at_ports: u64 = self.ports.iter().map(|p| p.empty + p.full).sum();
        let on_vessels: u64 = self.vessels.iter().map(|v| v.empty + v.full).sum();
        at_ports + on_vessels
    }

    fn current_port(&self, vessel_idx: usize) -> usize {
        let vessel = &self.vessels[vessel_idx];
        self.routes[vessel.route_idx][vessel.stop_idx].0
    }

    fn event_for(&self, vessel_idx: usize) -> DecisionEvent {
        let port_idx = self.current_port(vessel_idx);
        let port = &self.ports[port_idx];
        let vessel = &self.vessels[vessel_idx];
        DecisionEvent {
            tick: self.tick(),
            port_idx,
            vessel_idx,
            action_scope: ActionScope {
                load: port.empty.min(vessel.remaining_space()),
                discharge: vessel.empty.min(port.free_space()),
            },
        }
    }

    fn draw_orders(rng: &mut StdRng, rate: f64) -> u64 {
        let base = rate.floor() as u64;
        let extra = rng.random::<f64>() < rate.fract();
        base + u64::from(extra)
    }

    fn arrive(&mut self, vessel_idx: usize) {
        let port_idx = self.current_port(vessel_idx);
        let port = &mut self.ports[port_idx];
        let vessel = &mut self.vessels[vessel_idx];

        // laden containers are unpacked at the consignee and become empties
        port.empty += vessel.full;
        vessel.full = 0;

        let loaded = port.full.min(vessel.remaining_space());
        port.full -= loaded;
        vessel.full += loaded;

        vessel.status = VesselStatus::Docked;
        self.pending.push_back(vessel_idx);
    }

    fn depart(&mut self, vessel_idx: usize) {
        let vessel = &mut self.vessels[vessel_idx];
        let route = &self.routes[vessel.route_idx];
        let sailing_ticks = route[vessel.stop_idx].1;
        vessel.stop_idx = (vessel.stop_idx + 1) % route.len();
        vessel.status = VesselStatus::Sailing {
            remaining: sailing_ticks,
        };
    }

    fn run_tick(&mut self) {
        for port in &mut self.ports {
            let booking = Self::draw_orders(&mut self.rng, port.order_rate);
            let fulfillment = booking.min(port.empty);
            port.empty -= fulfillment;
            port.full += fulfillment;
            port.booking = booking;
            port.fulfillment = fulfillment;
            port.shortage = booking - fulfillment;

            self.metrics.order_requirements += booking;
            self.metrics.container_shortage += port.shortage;
        }

        for vessel_idx in 0..self.vessels.len() {
            if let VesselStatus::Sailing { remaining } = self.vessels[vessel_idx].status {
                if remaining <= 1 {
                    self.arrive(vessel_idx);
                } else {
                    self.vessels[vessel_idx].status = VesselStatus::Sailing {
                        remaining: remaining - 1,
                    };
                }
            }
        }

        let ports = self.ports.iter().map(PortState::snapshot).collect();
        let vessels = self
            .vessels
            .iter()
            .map(|v| VesselSnapshot {
                empty: v.empty,
                full: v.full,
                capacity: v.capacity,
            })
            .collect();
        self.snapshots.push(ports, vessels);
    }

    fn apply(&mut self, vessel_idx: usize, action: Option<Action>) -> Result<()> {
        let Some(action) = action else {
            return Ok(());
        };
        ensure!(
            action.vessel_idx == vessel_idx,
            "action targets vessel {} but vessel {vessel_idx} is waiting",
            action.vessel_idx
        );
        let event = self.event_for(vessel_idx);
        ensure!(
            action.port_idx == event.port_idx,
            "action targets port {} but the vessel is at port {}",
            action.port_idx,
            event.port_idx
        );

        let scope = event.action_scope;
        let quantity = action
            .quantity
            .clamp(-(scope.load as i64), scope.discharge as i64);
        if quantity != action.quantity {
            warn!(
                "clamped action {} to {quantity} at tick {} (scope {scope:?})",
                action.quantity, event.tick
            );
        }

        let port = &mut self.ports[event.port_idx];
        let vessel = &mut self.vessels[vessel_idx];
        let amount = quantity.unsigned_abs();
        if quantity > 0 {
            vessel.empty -= amount;
            port.empty += amount;
        } else {
            port.empty -= amount;
            vessel.empty += amount;
        }
        self.metrics.operation_number += amount;
        Ok(())
    }
}

impl Environment for CimEnv {
    type DecisionEvent = DecisionEvent;
    type Action = Action;
    type Metrics = Metrics;

    fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
        self.ports = self
            .topology
            .ports
            .iter()
            .map(|p| PortState {
                empty: p.initial_empty,
                full: 0,
                capacity: p.capacity,
                order_rate: p.order_rate,
                booking: 0,
                shortage: 0,
                fulfillment: 0,
            })
            .collect();
        self.vessels = self
            .topology
            .vessels
            .iter()
            .map(|v| VesselState {
                empty: v.initial_empty,
                full: 0,
                capacity: v.capacity,
                route_idx: self
                    .topology
                    .routes
                    .iter()
                    .position(|r| r.name == v.route)
                    .unwrap_or_default(),
                stop_idx: v.start_stop,
                status: VesselStatus::Sailing {
                    remaining: v.first_arrival,
                },
            })
            .collect();
        self.pending.clear();
        self.snapshots.clear();
        self.metrics = Metrics::default();
        self.started = false;
        self.done = false;
    }

    fn step(&mut self, action: Option<Action>) -> Result<StepResult<DecisionEvent>> {
        ensure!(!self.done, "episode is over, reset the environment first");

        if self.started {
            let Some(vessel_idx) = self.pending.pop_front() else {
                bail!("no decision is pending");
            };
            self.apply(vessel_idx, action)?;
            self.depart(vessel_idx);
        } else {
            ensure!(action.is_none(), "the first step of an episode takes no action");
            self.started = true;
        }

        loop {
            if let Some(&vessel_idx) = self.pending.front() {
                return Ok(StepResult {
                    decision_event: Some(self.event_for(vessel_idx)),
                    done: false,
                });
            }
            if self.snapshots.len() >= self.durations {
                self.done = true;
                debug!("episode finished with {:?}", self.metrics);
                return Ok(StepResult {
                    decision_event: None,
                    done: true,
                });
            }
            self.run_tick();
        }
    }

    fn tick(&self) -> usize {
        self.snapshots.len().saturating_sub(1)
    }

    fn agent_ids(&self) -> Vec<String> {
        self.topology.ports.iter().map(|p| p.name.clone()).collect()
    }

    fn agent_of(&self, event: &DecisionEvent) -> String {
        self.topology.ports[event.port_idx].name.clone()
    }

    fn metrics(&self) -> Metrics {
        self.metrics
    }
}
