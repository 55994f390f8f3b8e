use crate::{
    api::{self, ServiceConfig, email::DispatchConfig},
    cli::commands::{database, email},
};
use anyhow::Result;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub database: database::Options,
    pub email: email::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the DSN cannot be assembled or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let dsn = args.database.dsn()?;

    let config =
        ServiceConfig::new().with_verification_ttl_seconds(args.email.verification_ttl_seconds);

    let dispatch = DispatchConfig::new()
        .with_poll_interval_seconds(args.email.outbox.poll_seconds)
        .with_batch_size(args.email.outbox.batch_size)
        .with_max_attempts(args.email.outbox.max_attempts)
        .with_backoff_base_seconds(args.email.outbox.backoff_base_seconds)
        .with_backoff_max_seconds(args.email.outbox.backoff_max_seconds);

    api::new(
        args.port,
        dsn,
        config,
        dispatch,
        args.email.skip_notifications,
    )
    .await
}
