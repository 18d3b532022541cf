//! Connection configuration loaded from the environment: `DATABASE_URL`
//! plus connection pool sizing.

use dotenvy::dotenv;
use once_cell::sync::Lazy;
use std::env;

static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv();
});

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
}

impl DbConfig {
    /// Reads `DATABASE_URL`, `TESSELLA_DB_MIN_CONNECTIONS` and
    /// `TESSELLA_DB_MAX_CONNECTIONS`, with sensible pool-size defaults.
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        let url = env::var("DATABASE_URL").expect("DATABASE_URL not set");
        let min_connections = env::var("TESSELLA_DB_MIN_CONNECTIONS").ok().and_then(|v| v.parse().ok()).unwrap_or(2);
        let max_connections = env::var("TESSELLA_DB_MAX_CONNECTIONS").ok().and_then(|v| v.parse().ok()).unwrap_or(16);
        Self { url, min_connections, max_connections }
    }
}

/// Forces `.env` to load early, for callers that want the side effect before
/// reading other environment variables.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}
