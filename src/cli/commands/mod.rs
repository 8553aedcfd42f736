mod resolve;
mod scan;
mod status;
mod subscribe;
mod watchers;

pub use resolve::cmd_resolve;
pub use scan::cmd_scan;
pub use status::cmd_status;
pub use subscribe::cmd_subscribe;
pub use watchers::cmd_watchers;
