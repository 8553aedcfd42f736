pub const CATALOG_API: &str = "https://graphql.anilist.co";

pub const USER_AGENT: &str = "Anipush/1.0";

/// Formats requested from the catalog when paginating updates.
pub const SCREEN_FORMATS: &[&str] = &["TV", "TV_SHORT", "MOVIE", "SPECIAL", "OVA", "ONA", "MUSIC"];

pub mod limits {

    /// Hard cap the catalog enforces on `perPage`.
    pub const MAX_PER_PAGE: u32 = 50;

    pub const DEFAULT_BATCH_SIZE: usize = 25;

    pub const DEFAULT_PAGE_SIZE: u32 = 50;

    pub const DEFAULT_SHORT_PAGE_RETRIES: u32 = 3;
}

pub mod intervals {

    pub const MIN_REQUEST_SPACING_MS: u64 = 2_200;

    pub const UNAVAILABLE_WAIT_SECS: u64 = 60;

    pub const RATE_LIMIT_FALLBACK_SECS: u64 = 31;

    /// Upper bound on a server-supplied `Retry-After`.
    pub const MAX_RETRY_AFTER_SECS: u64 = 3_600;

    pub const ERROR_WAIT_SECS: u64 = 15;

    pub const TELEGRAM_SEND_DELAY_MS: u64 = 5_000;
}
