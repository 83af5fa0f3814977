//! Service configuration and shared request state.
//!
//! Everything here is constructed once at startup and passed to handlers by
//! reference through an axum `Extension`; there is no module-level mutable
//! state anywhere in the crate.

use secrecy::SecretString;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::AuditRecorder;
use crate::credentials::{DEFAULT_MEMORY_KIB, DEFAULT_TIME_COST, PasswordHasherConfig};
use crate::mail::MailSender;
use crate::rate_limit::RateLimiter;
use crate::rbac::{PermissionEvaluator, PgPermissionSource};
use crate::token::TokenService;

const DEFAULT_ACCESS_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_VERIFICATION_TOKEN_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_PERMISSION_CACHE_TTL_SECONDS: u64 = 30;

#[derive(Clone, Debug)]
pub struct AppConfig {
    signing_secret: SecretString,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    verification_token_ttl_seconds: i64,
    reset_token_ttl_seconds: i64,
    permission_cache_ttl_seconds: u64,
    hash_time_cost: u32,
    hash_memory_kib: u32,
}

impl AppConfig {
    #[must_use]
    pub fn new(signing_secret: SecretString) -> Self {
        Self {
            signing_secret,
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            verification_token_ttl_seconds: DEFAULT_VERIFICATION_TOKEN_TTL_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            permission_cache_ttl_seconds: DEFAULT_PERMISSION_CACHE_TTL_SECONDS,
            hash_time_cost: DEFAULT_TIME_COST,
            hash_memory_kib: DEFAULT_MEMORY_KIB,
        }
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_verification_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verification_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_permission_cache_ttl_seconds(mut self, seconds: u64) -> Self {
        self.permission_cache_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_hash_cost(mut self, time_cost: u32, memory_kib: u32) -> Self {
        self.hash_time_cost = time_cost;
        self.hash_memory_kib = memory_kib;
        self
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    #[must_use]
    pub fn verification_token_ttl_seconds(&self) -> i64 {
        self.verification_token_ttl_seconds
    }

    #[must_use]
    pub fn reset_token_ttl_seconds(&self) -> i64 {
        self.reset_token_ttl_seconds
    }

    #[must_use]
    pub fn permission_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.permission_cache_ttl_seconds)
    }
}

/// Shared per-process state handed to every handler.
pub struct AppState {
    config: AppConfig,
    tokens: TokenService,
    evaluator: PermissionEvaluator<PgPermissionSource>,
    rate_limiter: Arc<dyn RateLimiter>,
    audit: AuditRecorder,
    hasher: PasswordHasherConfig,
    mail: Arc<dyn MailSender>,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: AppConfig,
        pool: PgPool,
        rate_limiter: Arc<dyn RateLimiter>,
        audit: AuditRecorder,
        mail: Arc<dyn MailSender>,
    ) -> Self {
        let tokens = TokenService::new(&config.signing_secret, config.access_ttl_seconds);
        let evaluator = PermissionEvaluator::new(
            PgPermissionSource::new(pool),
            config.permission_cache_ttl(),
        );
        let hasher = PasswordHasherConfig::new(config.hash_time_cost, config.hash_memory_kib);
        Self {
            config,
            tokens,
            evaluator,
            rate_limiter,
            audit,
            hasher,
            mail,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    #[must_use]
    pub fn evaluator(&self) -> &PermissionEvaluator<PgPermissionSource> {
        &self.evaluator
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    #[must_use]
    pub fn audit(&self) -> &AuditRecorder {
        &self.audit
    }

    #[must_use]
    pub fn hasher(&self) -> &PasswordHasherConfig {
        &self.hasher
    }

    #[must_use]
    pub fn mail(&self) -> &dyn MailSender {
        self.mail.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_and_overrides() {
        let config = AppConfig::new(SecretString::from("0123456789abcdef0123456789abcdef"));
        assert_eq!(config.access_ttl_seconds(), DEFAULT_ACCESS_TTL_SECONDS);
        assert_eq!(config.refresh_ttl_seconds(), DEFAULT_REFRESH_TTL_SECONDS);
        assert_eq!(
            config.permission_cache_ttl(),
            Duration::from_secs(DEFAULT_PERMISSION_CACHE_TTL_SECONDS)
        );

        let config = config
            .with_access_ttl_seconds(60)
            .with_refresh_ttl_seconds(3600)
            .with_verification_token_ttl_seconds(120)
            .with_reset_token_ttl_seconds(90)
            .with_permission_cache_ttl_seconds(5)
            .with_hash_cost(1, 1024);

        assert_eq!(config.access_ttl_seconds(), 60);
        assert_eq!(config.refresh_ttl_seconds(), 3600);
        assert_eq!(config.verification_token_ttl_seconds(), 120);
        assert_eq!(config.reset_token_ttl_seconds(), 90);
        assert_eq!(config.permission_cache_ttl(), Duration::from_secs(5));
    }
}
