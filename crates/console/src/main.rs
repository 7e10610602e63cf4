use std::sync::Arc;

use brewdesk_auth::SessionToken;
use brewdesk_console::cli::Cli;
use brewdesk_console::config::ConsoleConfig;
use brewdesk_console::console::Console;
use brewdesk_console::metrics;
use clap::Parser;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let command = Cli::parse().command();

    let config = match ConsoleConfig::load() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("STARTUP_ERROR {}", err);
            std::process::exit(1);
        }
    };

    let tokens = match config.session_token.as_deref() {
        Some(token) => SessionToken::new(token),
        None => SessionToken::empty(),
    };

    let console = match Console::connect(&config, Arc::new(tokens)).await {
        Ok(console) => console,
        Err(err) => {
            eprintln!("STARTUP_ERROR {}", err);
            std::process::exit(1);
        }
    };

    let mut stdout = std::io::stdout().lock();
    let result = command.run(&console, &mut stdout).await;

    if config.print_metrics {
        match metrics::render() {
            Ok((body, _)) => eprint!("{}", String::from_utf8_lossy(&body)),
            Err(err) => tracing::warn!(error = %err, "metrics.render_failed"),
        }
    }

    if let Err(err) = result {
        eprintln!("ERROR {}", err);
        std::process::exit(1);
    }
}
