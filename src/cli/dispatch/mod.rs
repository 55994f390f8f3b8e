//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the
//! appropriate action, such as starting the API server with its full
//! configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{database, email};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let database = database::Options::parse(matches)?;
    let email = email::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        database,
        email,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn server_action_from_env() {
        temp_env::with_vars(
            [
                ("KONTO_PORT", Some("9090")),
                ("KONTO_DB_HOST", Some("localhost")),
                ("KONTO_DB_USER", Some("konto")),
                ("KONTO_DB_PASSWORD", Some("hunter2")),
                ("KONTO_DB_NAME", Some("konto")),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["konto"]);
                let action = handler(&matches).expect("server action");
                let Action::Server(args) = action;
                assert_eq!(args.port, 9090);
                assert_eq!(args.database.host, "localhost");
                assert_eq!(args.database.password.expose_secret(), "hunter2");
                assert_eq!(args.email.verification_ttl_seconds, 120);
                assert!(!args.email.skip_notifications);
            },
        );
    }

    #[test]
    fn db_host_required() {
        temp_env::with_vars(
            [
                ("KONTO_DB_HOST", None::<&str>),
                ("KONTO_DB_USER", Some("konto")),
                ("KONTO_DB_PASSWORD", Some("hunter2")),
                ("KONTO_DB_NAME", Some("konto")),
            ],
            || {
                let command = crate::cli::commands::new();
                let result = command.try_get_matches_from(vec!["konto"]);
                assert_eq!(
                    result.map(|_| ()).map_err(|e| e.kind()),
                    Err(clap::error::ErrorKind::MissingRequiredArgument)
                );
            },
        );
    }
}
