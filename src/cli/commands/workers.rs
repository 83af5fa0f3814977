use clap::{Arg, Command};

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("sweep-interval-seconds")
                .long("sweep-interval-seconds")
                .help("How often the session expiry sweeper runs")
                .env("WARDEN_SWEEP_INTERVAL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("audit-retention-days")
                .long("audit-retention-days")
                .help("Audit entries older than this are deleted by the retention job")
                .env("WARDEN_AUDIT_RETENTION_DAYS")
                .default_value("90")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("retention-interval-seconds")
                .long("retention-interval-seconds")
                .help("How often the audit retention job runs")
                .env("WARDEN_RETENTION_INTERVAL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
}
