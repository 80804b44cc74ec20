#![forbid(unsafe_code)]

pub mod app;
pub mod build;
pub mod cli;
pub mod config;
pub mod enrich;
pub mod error;
pub mod export;
pub mod formats;
pub mod logging;
pub mod openai;
pub mod params;
pub mod plan;
pub mod progress;
pub mod synth;
pub mod validate;
