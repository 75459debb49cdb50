//! Core translation engine module

pub mod cache;
pub mod client;
pub mod config;
pub mod errors;
pub mod languages;
pub mod models;
pub mod orchestrator;
pub mod progress;
