// Hybrid-core affinity management: topology detection, mask arithmetic,
// and mask application across running processes.

pub mod controller;
pub mod mask;
#[cfg(windows)]
pub mod process;
pub mod topology;

pub use controller::{AffinityController, ApplyError, ProcessAffinitySink, ProcessEntry};
pub use mask::{generate_mask, AffinityMask, CoreMaskLayout};
#[cfg(windows)]
pub use process::{WindowsProcessSink, WindowsTopologyProvider};
pub use topology::{CoreTopology, TopologyProvider};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AffinityError {
    #[error("Core topology unavailable: {0}")]
    TopologyUnavailable(String),
    #[error("Invalid core count: {requested} exceeds the {width}-bit mask width")]
    InvalidCoreCount { requested: u32, width: u32 },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Process snapshot failed: {0}")]
    SnapshotFailed(String),
}
