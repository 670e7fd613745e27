// LogWeave - core/mod.rs
//
// Core logic: lines, text decoding, timestamp parsing, filtering.
// Dependencies: util and pure crates (regex, chrono, rayon).
// Must NOT depend on: app, platform, or do any I/O.

pub mod encoding;
pub mod filter;
pub mod model;
pub mod parser;
