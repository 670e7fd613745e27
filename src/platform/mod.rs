// LogWeave - platform/mod.rs
//
// Platform abstraction layer: config directories and the config file.
// Dependencies: directories, toml; core only for its pure validators
// (encoding labels, timestamp patterns).
// Must NOT depend on: app.

pub mod config;
