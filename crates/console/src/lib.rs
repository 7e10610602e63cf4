pub mod cli;
pub mod config;
pub mod console;
pub mod draft;
pub mod drinks;
pub mod gate;
pub mod metrics;
pub mod store;
pub mod transport;
pub mod users;

#[cfg(test)]
mod testkit;
