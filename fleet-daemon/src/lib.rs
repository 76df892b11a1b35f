//! fleet daemon: config watcher + push-event socket server + systemd unit.

mod error;
pub mod log_rotation;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod systemd;

pub use error::DaemonError;
pub use protocol::{
    request_event, request_init, request_reload, request_status, request_stop, send_request,
    DaemonRequest, DaemonResponse,
};
pub use runtime::{run, run_with_runner, start_blocking, ConfigStatus};
pub use systemd::{generate_unit, install as install_systemd, uninstall as uninstall_systemd};
