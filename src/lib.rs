// LogWeave - lib.rs
//
// Library entry point. The binary in `main.rs` is a thin CLI over this
// surface; integration tests drive it directly.

pub mod app;
pub mod core;
pub mod platform;
pub mod util;
