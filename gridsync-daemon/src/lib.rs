//! gridsync daemon: sync engine + socket server.

pub mod config;
mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use config::DaemonConfig;
pub use error::DaemonError;
pub use protocol::{request, request_status, request_stop, send_request, DaemonRequest, DaemonResponse};
pub use runtime::{dispatch, run, start_blocking, Daemon};
