mod archive;
mod compact;
mod exec;
mod snapshot;

pub use archive::{run_export, run_populate};
pub use compact::run_compact;
pub use exec::{run_exec, ExecArgs};
pub use snapshot::run_snapshot;
