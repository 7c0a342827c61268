//! Absence Line — school-absence SMS conversation engine.

pub mod classifier;
pub mod config;
pub mod error;
pub mod http;
pub mod model;
pub mod store;
pub mod tracker;
pub mod transport;
