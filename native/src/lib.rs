pub mod affinity;
pub mod config;
pub mod ipc;
pub mod logging;
pub mod monitor;

// Re-export core types and helpers for internal Rust use.
pub use affinity::{AffinityController, AffinityError, AffinityMask, CoreTopology};
pub use config::ServiceConfig;
pub use ipc::{HandlerChain, IpcError, MessageHandler};

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
