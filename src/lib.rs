// src/lib.rs

pub mod broadcast;
pub mod camera;
pub mod classifier;
pub mod config;
pub mod detector;
pub mod pipeline;
pub mod server;
pub mod state;
pub mod store;
pub mod tracker;
