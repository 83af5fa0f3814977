//! Command-line argument dispatch and server initialization.
//!
//! Parses validated CLI arguments and maps them to the appropriate action,
//! such as starting the API server with its full configuration.

use crate::cli::actions::{Action, server::Args};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    crate::cli::commands::validate(matches).map_err(|e| anyhow::anyhow!(e))?;

    let signing_secret = matches
        .get_one::<String>("signing-secret")
        .cloned()
        .context("missing required argument: --signing-secret")?;

    let get_i64 = |name: &str| matches.get_one::<i64>(name).copied();
    let get_u64 = |name: &str| matches.get_one::<u64>(name).copied();

    Ok(Action::Server(Args {
        port,
        dsn,
        signing_secret,
        access_ttl_seconds: get_i64("access-ttl-seconds").unwrap_or(900),
        refresh_ttl_seconds: get_i64("refresh-ttl-seconds").unwrap_or(2_592_000),
        verification_token_ttl_seconds: get_i64("verification-token-ttl-seconds").unwrap_or(1800),
        reset_token_ttl_seconds: get_i64("reset-token-ttl-seconds").unwrap_or(900),
        permission_cache_ttl_seconds: get_u64("permission-cache-ttl-seconds").unwrap_or(30),
        hash_time_cost: matches.get_one::<u32>("hash-time-cost").copied().unwrap_or(3),
        hash_memory_kib: matches
            .get_one::<u32>("hash-memory-kib")
            .copied()
            .unwrap_or(65536),
        rate_window_seconds: get_u64("rate-window-seconds").unwrap_or(60),
        rate_max_attempts: matches
            .get_one::<usize>("rate-max-attempts")
            .copied()
            .unwrap_or(30),
        rate_max_failures: matches
            .get_one::<usize>("rate-max-failures")
            .copied()
            .unwrap_or(3),
        sweep_interval_seconds: get_u64("sweep-interval-seconds").unwrap_or(300),
        audit_retention_days: get_i64("audit-retention-days").unwrap_or(90),
        retention_interval_seconds: get_u64("retention-interval-seconds").unwrap_or(3600),
    }))
}
