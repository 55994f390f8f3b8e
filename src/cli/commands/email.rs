use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_SKIP_NOTIFICATIONS: &str = "skip-notifications";
pub const ARG_VERIFICATION_TTL: &str = "verification-ttl-seconds";
pub const ARG_OUTBOX_POLL: &str = "outbox-poll-seconds";
pub const ARG_OUTBOX_BATCH: &str = "outbox-batch-size";
pub const ARG_OUTBOX_MAX_ATTEMPTS: &str = "outbox-max-attempts";
pub const ARG_OUTBOX_BACKOFF_BASE: &str = "outbox-backoff-base-seconds";
pub const ARG_OUTBOX_BACKOFF_MAX: &str = "outbox-backoff-max-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SKIP_NOTIFICATIONS)
                .long(ARG_SKIP_NOTIFICATIONS)
                .help("Do not dispatch outbox notifications (test environments)")
                .env("KONTO_SKIP_NOTIFICATIONS")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_VERIFICATION_TTL)
                .long(ARG_VERIFICATION_TTL)
                .help("Seconds a verification token stays valid after issuance")
                .default_value("120")
                .env("KONTO_VERIFICATION_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_OUTBOX_POLL)
                .long(ARG_OUTBOX_POLL)
                .help("Outbox poll interval in seconds")
                .default_value("5")
                .env("KONTO_OUTBOX_POLL_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OUTBOX_BATCH)
                .long(ARG_OUTBOX_BATCH)
                .help("Outbox rows locked per poll cycle")
                .default_value("10")
                .env("KONTO_OUTBOX_BATCH_SIZE")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_OUTBOX_MAX_ATTEMPTS)
                .long(ARG_OUTBOX_MAX_ATTEMPTS)
                .help("Publish attempts before an outbox row is marked failed")
                .default_value("5")
                .env("KONTO_OUTBOX_MAX_ATTEMPTS")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_OUTBOX_BACKOFF_BASE)
                .long(ARG_OUTBOX_BACKOFF_BASE)
                .help("Base retry backoff in seconds")
                .default_value("5")
                .env("KONTO_OUTBOX_BACKOFF_BASE_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OUTBOX_BACKOFF_MAX)
                .long(ARG_OUTBOX_BACKOFF_MAX)
                .help("Maximum retry backoff in seconds")
                .default_value("300")
                .env("KONTO_OUTBOX_BACKOFF_MAX_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
}

/// Outbox worker tuning knobs.
#[derive(Debug)]
pub struct OutboxOptions {
    pub poll_seconds: u64,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
}

/// Verification and notification settings.
#[derive(Debug)]
pub struct Options {
    pub skip_notifications: bool,
    pub verification_ttl_seconds: i64,
    pub outbox: OutboxOptions,
}

impl Options {
    /// # Errors
    /// Infallible today; kept as `Result` so new required arguments slot in.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            skip_notifications: matches.get_flag(ARG_SKIP_NOTIFICATIONS),
            verification_ttl_seconds: matches
                .get_one::<i64>(ARG_VERIFICATION_TTL)
                .copied()
                .unwrap_or(120),
            outbox: OutboxOptions {
                poll_seconds: matches.get_one::<u64>(ARG_OUTBOX_POLL).copied().unwrap_or(5),
                batch_size: matches
                    .get_one::<usize>(ARG_OUTBOX_BATCH)
                    .copied()
                    .unwrap_or(10),
                max_attempts: matches
                    .get_one::<u32>(ARG_OUTBOX_MAX_ATTEMPTS)
                    .copied()
                    .unwrap_or(5),
                backoff_base_seconds: matches
                    .get_one::<u64>(ARG_OUTBOX_BACKOFF_BASE)
                    .copied()
                    .unwrap_or(5),
                backoff_max_seconds: matches
                    .get_one::<u64>(ARG_OUTBOX_BACKOFF_MAX)
                    .copied()
                    .unwrap_or(300),
            },
        })
    }
}
