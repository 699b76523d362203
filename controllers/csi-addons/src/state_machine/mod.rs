//! Resource state machines
//!
//! Pure functions from (desired spec, current status) to the next step, and
//! from (step, agent outcome) to the next status. Reconcilers own all I/O;
//! nothing here reads the cluster or calls the agent.

pub mod fence;
pub mod operation;
pub mod replication;
