//! MatchBox - match clips and scene switching for robotics events
//!
//! This library crate exposes the core components for integration testing.

pub mod advertise;
pub mod agents;
pub mod catalog;
pub mod clips;
pub mod config;
pub mod error;
pub mod events;
pub mod obs;
pub mod orchestrator;
pub mod server;
pub mod state;
pub mod stream;
pub mod switcher;
pub mod tracker;
