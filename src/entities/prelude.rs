pub use super::franchise_groups::Entity as FranchiseGroups;
pub use super::relation_edges::Entity as RelationEdges;
pub use super::scan_state::Entity as ScanState;
pub use super::subscribers::Entity as Subscribers;
pub use super::titles::Entity as Titles;
pub use super::watch_records::Entity as WatchRecords;
