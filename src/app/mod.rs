// LogWeave - app/mod.rs
//
// Application layer: the view dispatcher, file readers, derived views and
// the view tree.
// Dependencies: core, util.
// Must NOT depend on: platform.

pub mod dispatcher;
pub mod filtered;
pub mod merged;
pub mod printer;
pub mod rate_limit;
pub mod tail;
pub mod tree;
pub mod view;
pub mod viewer;
pub mod workspace;
