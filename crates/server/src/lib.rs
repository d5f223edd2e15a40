//! HTTP front-end for the `dispatchd` job-dispatch engine.

pub mod cli;
pub mod routes;
pub mod shutdown;
pub mod state;
