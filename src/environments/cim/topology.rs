use std::collections::HashSet;

use anyhow::{Result, bail, ensure};
use serde::{Deserialize, Serialize};

pub const TOY_4P_SSDD: &str = "toy.4p_ssdd";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    /// Upper bound on containers (empty + laden) stored at the port.
    pub capacity: u64,
    pub initial_empty: u64,
    /// Mean number of export orders per tick.
    pub order_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    pub port: String,
    /// Ticks needed to sail from this stop to the next one on the route.
    pub sailing_ticks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSpec {
    pub name: String,
    pub stops: Vec<RouteStop>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselSpec {
    pub name: String,
    pub route: String,
    pub capacity: u64,
    #[serde(default)]
    pub initial_empty: u64,
    /// Index of the first stop the vessel calls at.
    #[serde(default)]
    pub start_stop: usize,
    #[serde(default = "default_first_arrival")]
    pub first_arrival: usize,
}

fn default_first_arrival() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub ports: Vec<PortSpec>,
    pub routes: Vec<RouteSpec>,
    pub vessels: Vec<VesselSpec>,
}

/// Either the name of a built-in topology or an inline definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopologySpec {
    Builtin(String),
    Inline(Topology),
}

impl TopologySpec {
    pub fn resolve(&self) -> Result<Topology> {
        let topology = match self {
            TopologySpec::Builtin(name) => Topology::builtin(name)?,
            TopologySpec::Inline(topology) => topology.clone(),
        };
        topology.validate()?;
        Ok(topology)
    }
}

impl Topology {
    pub fn builtin(name: &str) -> Result<Self> {
        match name {
            TOY_4P_SSDD => Ok(Self::toy_four_ports()),
            other => bail!("unknown built-in topology '{other}'"),
        }
    }

    /// Two supply and two demand ports served by two loops.
    pub fn toy_four_ports() -> Self {
        let port = |name: &str, initial_empty, order_rate| PortSpec {
            name: name.to_string(),
            capacity: 10_000,
            initial_empty,
            order_rate,
        };
        let stop = |port: &str, sailing_ticks| RouteStop {
            port: port.to_string(),
            sailing_ticks,
        };
        let vessel = |name: &str, route: &str, start_stop, first_arrival| VesselSpec {
            name: name.to_string(),
            route: route.to_string(),
            capacity: 5_000,
            initial_empty: 250,
            start_stop,
            first_arrival,
        };

        Topology {
            ports: vec![
                port("demand_port_001", 1_000, 40.0),
                port("demand_port_002", 1_000, 35.0),
                port("supply_port_001", 2_500, 8.0),
                port("supply_port_002", 2_500, 6.5),
            ],
            routes: vec![
                RouteSpec {
                    name: "route_001".to_string(),
                    stops: vec![
                        stop("supply_port_001", 7),
                        stop("demand_port_001", 8),
                    ],
                },
                RouteSpec {
                    name: "route_002".to_string(),
                    stops: vec![
                        stop("supply_port_001", 5),
                        stop("supply_port_002", 6),
                        stop("demand_port_002", 9),
                    ],
                },
            ],
            vessels: vec![
                vessel("rt1_vessel_001", "route_001", 0, 1),
                vessel("rt1_vessel_002", "route_001", 1, 4),
                vessel("rt2_vessel_001", "route_002", 0, 2),
                vessel("rt2_vessel_002", "route_002", 1, 5),
                vessel("rt2_vessel_003", "route_002", 2, 8),
            ],
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.ports.is_empty(), "topology has no ports");
        ensure!(!self.vessels.is_empty(), "topology has no vessels");

        let mut port_names = HashSet::new();
        for port in &self.ports {
            ensure!(port_names.insert(port.name.as_str()), "duplicate port '{}'", port.name);
            ensure!(
                port.initial_empty <= port.capacity,
                "port '{}' starts above its capacity",
                port.name
            );
            ensure!(
                port.order_rate.is_finite() && port.order_rate >= 0.0,
                "port '{}' has an invalid order rate",
                port.name
            );
        }

        let mut route_names = HashSet::new();
        for route in &self.routes {
            ensure!(route_names.insert(route.name.as_str()), "duplicate route '{}'", route.name);
            ensure!(route.stops.len() >= 2, "route '{}' needs at least two stops", route.name);
            for stop in &route.stops {
                ensure!(
                    port_names.contains(stop.port.as_str()),
                    "route '{}' calls at unknown port '{}'",
                    route.name,
                    stop.port
                );
                ensure!(stop.sailing_ticks > 0, "route '{}' has a zero-length leg", route.name);
            }
        }

        for vessel in &self.vessels {
            let Some(route) = self.routes.iter().find(|r| r.name == vessel.route) else {
                bail!("vessel '{}' sails unknown route '{}'", vessel.name, vessel.route);
            };
            ensure!(
                vessel.start_stop < route.stops.len(),
                "vessel '{}' starts past the end of its route",
                vessel.name
            );
            ensure!(
                vessel.initial_empty <= vessel.capacity,
                "vessel '{}' starts above its capacity",
                vessel.name
            );
            ensure!(vessel.first_arrival > 0, "vessel '{}' must arrive after tick 0", vessel.name);
        }

        Ok(())
    }

    pub fn port_index(&self, name: &str) -> Option<usize> {
        self.ports.iter().position(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_toy_topology_is_valid() {
        let topology = TopologySpec::Builtin(TOY_4P_SSDD.to_string()).resolve().unwrap();
        assert_eq!(topology.ports.len(), 4);
        assert_eq!(topology.port_index("supply_port_002"), Some(3));
    }

    #[test]
    fn unknown_builtin_is_rejected() {
        assert!(TopologySpec::Builtin("toy.9p".to_string()).resolve().is_err());
    }

    #[test]
    fn route_to_missing_port_is_rejected() {
        let mut topology = Topology::toy_four_ports();
        topology.routes[0].stops[1].port = "nowhere".to_string();
        let err = topology.validate().unwrap_err();
        assert!(err.to_string().contains("unknown port"));
    }
}
