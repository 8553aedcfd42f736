pub mod group;
pub mod relation;
pub mod scan_state;
pub mod subscriber;
pub mod title;
