//! Storage infrastructure: configuration file loading and saving.

pub mod config;
