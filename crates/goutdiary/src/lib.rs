//! Persistence and sync layer for the gout diary.
//!
//! Prefers PostgreSQL and falls back to an embedded SQLite file, keeps either
//! schema current, migrates the embedded data once PostgreSQL becomes
//! available, and resolves client uploads with last-write-wins.

pub mod config;
pub mod storage;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter. `LOG_FORMAT=json` switches to
/// JSON lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "goutdiary=debug,sqlx=warn".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
