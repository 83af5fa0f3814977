use clap::{Arg, Command};

pub const ARG_SIGNING_SECRET: &str = "signing-secret";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SIGNING_SECRET)
                .long(ARG_SIGNING_SECRET)
                .help("HMAC secret for signing access tokens (min 32 bytes)")
                .env("WARDEN_SIGNING_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("hash-time-cost")
                .long("hash-time-cost")
                .help("Argon2id time cost (iterations)")
                .env("WARDEN_HASH_TIME_COST")
                .default_value("3")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("hash-memory-kib")
                .long("hash-memory-kib")
                .help("Argon2id memory cost in KiB")
                .env("WARDEN_HASH_MEMORY_KIB")
                .default_value("65536")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("rate-window-seconds")
                .long("rate-window-seconds")
                .help("Sliding window length for rate limiting")
                .env("WARDEN_RATE_WINDOW_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("rate-max-attempts")
                .long("rate-max-attempts")
                .help("Max attempts per key per window")
                .env("WARDEN_RATE_MAX_ATTEMPTS")
                .default_value("30")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("rate-max-failures")
                .long("rate-max-failures")
                .help("Failed credential checks per key per window before lockout")
                .env("WARDEN_RATE_MAX_FAILURES")
                .default_value("3")
                .value_parser(clap::value_parser!(usize)),
        )
}
