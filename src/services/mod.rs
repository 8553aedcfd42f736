pub mod gateway;
pub use gateway::{GatewayError, GroupApplied, PersistenceGateway};

pub mod notifier;
pub use notifier::{LogNotifier, NotificationDispatcher, TelegramNotifier};

pub mod resolver;
pub use resolver::{ReadThroughLookup, RelationLookup, ResolveError, Resolver, StoreLookup};

pub mod scan;
pub use scan::{ScanDriver, ScanError, ScanReport};

pub mod subscriptions;
pub use subscriptions::{SubscriptionService, SyncReport};

pub mod scheduler;
pub use scheduler::Scheduler;
