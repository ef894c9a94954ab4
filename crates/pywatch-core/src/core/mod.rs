//! Internal implementation modules for `pywatch-core`.
//!
//! Callers outside the crate should go through the re-exports in the crate
//! root.

pub mod config;
pub mod context;
pub mod control;
pub mod detect;
pub mod effects;
pub mod errors;
pub mod fetch;
pub mod install;
pub mod net;
pub mod process;
pub mod provision;
pub mod python;
pub mod shutdown;
pub mod supervise;

#[cfg(test)]
pub(crate) mod testing;
