use std::io::Write;

use brewdesk_contracts::{User, UserId};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::console::Console;
use crate::store::{Gated, MutationOutcome, StoreError};

#[derive(Parser, Debug)]
#[command(name = "brewdesk")]
#[command(about = "Coffee shop menu and staff console", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Defaults to `drinks`
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Drinks)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the detailed drink menu
    Drinks,
    /// Print the shop's user accounts
    Users,
    /// Print the roles assigned to one user
    Roles {
        #[arg(value_parser = parse_user_id)]
        user_id: UserId,
    },
    /// Give a user the barista role
    Hire {
        #[arg(value_parser = parse_user_id)]
        user_id: UserId,
    },
    /// Take the barista role away from a user
    Fire {
        #[arg(value_parser = parse_user_id)]
        user_id: UserId,
    },
}

#[derive(Debug)]
pub enum CliError {
    Store(StoreError),
    Output(std::io::Error),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Store(err) => write!(f, "{}", err),
            CliError::Output(err) => write!(f, "failed to write output: {}", err),
        }
    }
}

impl std::error::Error for CliError {}

impl From<StoreError> for CliError {
    fn from(value: StoreError) -> Self {
        CliError::Store(value)
    }
}

impl From<std::io::Error> for CliError {
    fn from(value: std::io::Error) -> Self {
        CliError::Output(value)
    }
}

#[derive(Serialize)]
struct RoleChange<'a> {
    user_id: &'a UserId,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

fn parse_user_id(raw: &str) -> Result<UserId, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("user id must be non-empty".to_string());
    }
    Ok(UserId::from(trimmed))
}

impl Command {
    /// Runs the command and writes one JSON document per line to `out`.
    ///
    /// Operations the actor may not perform write nothing and succeed.
    pub async fn run<W: Write>(&self, console: &Console, out: &mut W) -> Result<(), CliError> {
        match self {
            Command::Drinks => {
                if console.drinks.list().await?.is_skipped() {
                    return Ok(());
                }
                let mut drinks = console.drinks.entries().await.into_values().collect::<Vec<_>>();
                drinks.sort_by_key(|drink| drink.id);
                write_lines(out, &drinks)
            }
            Command::Users => {
                if console.users.list().await?.is_skipped() {
                    return Ok(());
                }
                let mut users = console.users.entries().await.into_values().collect::<Vec<_>>();
                users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
                write_lines(out, &users)
            }
            Command::Roles { user_id } => {
                let fetch = console.users.fetch_roles(user_id);
                if !fetch.is_authorized() {
                    return Ok(());
                }
                let roles = fetch.await?;
                write_lines(out, &roles)
            }
            Command::Hire { user_id } | Command::Fire { user_id } => {
                let Gated::Done(mut form) = console
                    .gate
                    .open_user_form(&console.users, placeholder_user(user_id))
                else {
                    return Ok(());
                };

                let outcome = if matches!(self, Command::Hire { .. }) {
                    console.gate.promote(&mut form).await
                } else {
                    console.gate.demote(&mut form).await
                };
                let Gated::Done(outcome) = outcome else {
                    return Ok(());
                };

                let outcome = outcome?;
                let change = match &outcome {
                    MutationOutcome::Applied(()) => RoleChange {
                        user_id,
                        outcome: "applied",
                        message: None,
                    },
                    MutationOutcome::Rejected(message) => RoleChange {
                        user_id,
                        outcome: "rejected",
                        message: Some(message.as_str()),
                    },
                    MutationOutcome::Stale | MutationOutcome::Skipped => return Ok(()),
                };
                write_lines(out, &[change])
            }
        }
    }
}

fn placeholder_user(user_id: &UserId) -> User {
    User {
        user_id: user_id.clone(),
        email: None,
        name: None,
        nickname: None,
        picture: None,
        profile: serde_json::Map::new(),
    }
}

fn write_lines<W: Write, T: Serialize>(out: &mut W, items: &[T]) -> Result<(), CliError> {
    for item in items {
        let line = serde_json::to_string(item)
            .map_err(|err| CliError::Output(std::io::Error::other(err)))?;
        writeln!(out, "{}", line)?;
    }
    Ok(())
}
