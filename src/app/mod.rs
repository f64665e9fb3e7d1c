pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod fixtures;
pub mod host;
pub mod lifecycle;
pub mod logging;
pub mod orchestrator;
pub mod scenario;
pub mod services;
pub mod web;
