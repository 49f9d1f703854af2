//! Packet classification: header spaces, access lists, NAT rules and the filter result cache

pub mod acl;
pub mod cache;
pub mod header_space;
pub mod transformation;
