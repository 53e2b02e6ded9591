//! Simulation harness for exercising whole clusters in one process.
//!
//! [`NetworkSimulator`] carries encoded messages between nodes and can drop,
//! isolate or partition them. [`ClusterHarness`] ticks a cluster of
//! [`zab_engine::ZabNode`]s over it, and [`scenarios`] holds the cluster-wide
//! safety checks the integration tests assert after every fault.

pub mod fault_injection;
pub mod network;
pub mod network_sim;
pub mod scenarios;

pub use fault_injection::{ClusterHarness, FaultType, TestNode};
pub use network::InMemoryTransport;
pub use network_sim::{NetworkConditions, NetworkSimulator, NetworkStats};
pub use scenarios::{
    check_agreement, check_epochs_monotonic, check_no_duplicate_applies, check_safety,
    check_total_order, establish, write_and_wait,
};
pub use zab_core::learner::InMemoryLearner;
