use clap::{Arg, Command};

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("access-ttl-seconds")
                .long("access-ttl-seconds")
                .help("Access token lifetime in seconds")
                .env("WARDEN_ACCESS_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("refresh-ttl-seconds")
                .long("refresh-ttl-seconds")
                .help("Refresh token / session lifetime in seconds")
                .env("WARDEN_REFRESH_TTL_SECONDS")
                .default_value("2592000")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("verification-token-ttl-seconds")
                .long("verification-token-ttl-seconds")
                .help("Email verification token TTL in seconds")
                .env("WARDEN_VERIFICATION_TOKEN_TTL_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("reset-token-ttl-seconds")
                .long("reset-token-ttl-seconds")
                .help("Password reset token TTL in seconds")
                .env("WARDEN_RESET_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("permission-cache-ttl-seconds")
                .long("permission-cache-ttl-seconds")
                .help("Per-user permission cache TTL in seconds (0 disables caching)")
                .env("WARDEN_PERMISSION_CACHE_TTL_SECONDS")
                .default_value("30")
                .value_parser(clap::value_parser!(u64)),
        )
}
