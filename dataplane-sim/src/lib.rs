//! Offline simulation of how a network forwards packets
//!
//! Given the forwarding state of a set of devices (interfaces, routes, access lists and NAT
//! rules) and the links between them, [`trace::compute_traces`] follows flows hop by hop and
//! reports where each one ends up.

pub mod error;
pub mod filter;
pub mod flow;
pub mod network;
pub mod prefix_space;
pub mod sub_range;
pub mod trace;
mod util;
