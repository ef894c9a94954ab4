#![deny(clippy::all)]
#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

//! Plain data types shared by the pywatch supervisor: what a poll observed,
//! what the remote manifest asked for, and where the loop currently is.

pub mod manifest;
pub mod observation;
pub mod phase;
pub mod provisioning;

pub use manifest::DependencyManifest;
pub use observation::{resolve_reference, should_update, Fingerprint, Observation, PayloadReference};
pub use phase::LoopPhase;
pub use provisioning::ProvisioningState;
