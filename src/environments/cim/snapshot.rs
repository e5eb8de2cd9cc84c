use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortAttribute {
    Empty,
    Full,
    Booking,
    Shortage,
    Fulfillment,
    Capacity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VesselAttribute {
    Empty,
    Full,
    RemainingSpace,
    Capacity,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PortSnapshot {
    pub empty: u64,
    pub full: u64,
    pub booking: u64,
    pub shortage: u64,
    pub fulfillment: u64,
    pub capacity: u64,
}

impl PortSnapshot {
    pub fn attribute(&self, attribute: PortAttribute) -> f32 {
        let value = match attribute {
            PortAttribute::Empty => self.empty,
            PortAttribute::Full => self.full,
            PortAttribute::Booking => self.booking,
            PortAttribute::Shortage => self.shortage,
            PortAttribute::Fulfillment => self.fulfillment,
            PortAttribute::Capacity => self.capacity,
        };
        value as f32
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VesselSnapshot {
    pub empty: u64,
    pub full: u64,
    pub capacity: u64,
}

impl VesselSnapshot {
    pub fn remaining_space(&self) -> u64 {
        self.capacity.saturating_sub(self.empty + self.full)
    }

    pub fn attribute(&self, attribute: VesselAttribute) -> f32 {
        let value = match attribute {
            VesselAttribute::Empty => self.empty,
            VesselAttribute::Full => self.full,
            VesselAttribute::RemainingSpace => self.remaining_space(),
            VesselAttribute::Capacity => self.capacity,
        };
        value as f32
    }
}

/// Per-tick record of every port and vessel.
#[derive(Debug, Clone, Default)]
pub struct SnapshotList {
    ports: Vec<Vec<PortSnapshot>>,
    vessels: Vec<Vec<VesselSnapshot>>,
}

impl SnapshotList {
    pub fn clear(&mut self) {
        self.ports.clear();
        self.vessels.clear();
    }

    /// Records the frame for the next tick; frames must be pushed in tick order.
    pub fn push(&mut self, ports: Vec<PortSnapshot>, vessels: Vec<VesselSnapshot>) {
        self.ports.push(ports);
        self.vessels.push(vessels);
    }

    /// Number of recorded ticks.
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn port(&self, tick: usize, port_idx: usize) -> Option<&PortSnapshot> {
        self.ports.get(tick).and_then(|frame| frame.get(port_idx))
    }

    pub fn vessel(&self, tick: usize, vessel_idx: usize) -> Option<&VesselSnapshot> {
        self.vessels.get(tick).and_then(|frame| frame.get(vessel_idx))
    }
}
