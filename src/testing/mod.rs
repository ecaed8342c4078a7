//! Testing utilities for the cluster engine.
//!
//! [`mock`] provides a scripted in-process stand-in for the network:
//! each address carries a queue of per-connection scripts, and every
//! step of every exchange (replies, delays, errors, hangs) is declared
//! up front. The integration suites drive a real [`crate::Cluster`]
//! over these mocks with tokio's paused clock, so timing-sensitive
//! properties are deterministic.

pub mod mock;

#[cfg(test)]
mod cluster_tests;
#[cfg(test)]
mod transaction_tests;
#[cfg(test)]
mod util;
