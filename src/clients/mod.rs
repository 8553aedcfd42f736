pub mod anilist;
pub mod catalog;
pub mod telegram;

pub use anilist::AnilistClient;
pub use catalog::{AttemptFailure, CatalogError, CatalogSource, MediaPage};
pub use telegram::TelegramClient;
