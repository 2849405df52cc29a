//! Shop Guardian
//!
//! Records fixed-length segments from store cameras, uploads them to object
//! storage, and runs a multi-iteration AI analysis whose outputs are fused
//! into a single shoplifting verdict per segment.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
