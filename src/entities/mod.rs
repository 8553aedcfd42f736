pub mod prelude;

pub mod franchise_groups;
pub mod relation_edges;
pub mod scan_state;
pub mod subscribers;
pub mod titles;
pub mod watch_records;
