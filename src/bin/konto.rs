use anyhow::Result;
use konto::cli::{actions, actions::Action, start, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse arguments, initialize logging and resolve the action to run
    let action = start()?;

    match action {
        Action::Server(args) => actions::server::execute(args).await?,
    }

    telemetry::shutdown_tracer();

    Ok(())
}
