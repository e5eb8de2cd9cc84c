// detailed implementation
pub mod agent_manager;
pub mod algorithms;
pub mod config;
pub mod distributed;
pub mod environments;
pub mod exploration;
pub mod launcher;
pub mod networks;
pub mod shaping;
pub mod storage;
pub mod utils;

// Traits
pub mod agent;
pub mod environment;

#[cfg(test)]
pub(crate) mod testing;
