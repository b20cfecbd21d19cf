// Library exports for testing
pub mod analyser;
pub mod audio;
pub mod calibration;
pub mod classifier;
pub mod config;
pub mod constants;
pub mod controller;
pub mod error;
pub mod events;
pub mod permission;
pub mod platform;
pub mod sampler;
pub mod trace;
