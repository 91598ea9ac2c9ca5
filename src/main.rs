//! # MT Dispatch - Entry Point
//! src/main.rs
//!
//! `serve` levanta el dispatcher completo; `request` envía un request JSON
//! enmarcado a un dispatcher en ejecución e imprime la respuesta.

use clap::Parser;
use mt_dispatch::app::Dispatcher;
use mt_dispatch::config::{Cli, Command, Config, RequestArgs};
use mt_dispatch::protocol::Client;
use mt_dispatch::worker::TranslatorRegistry;
use std::io::{self, Read};
use std::process;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Command::Serve(config) => serve(&config),
        Command::Request(args) => request(&args),
    };
    process::exit(code);
}

fn serve(config: &Config) -> i32 {
    config.log_summary();

    let translators = TranslatorRegistry::with_builtins();
    let dispatcher = match Dispatcher::start(config, &translators) {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            tracing::error!(error = %e, "could not start dispatcher");
            return 1;
        }
    };

    match dispatcher.wait() {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "dispatcher stopped with error");
            1
        }
    }
}

fn request(args: &RequestArgs) -> i32 {
    let payload = match &args.json {
        Some(json) => json.clone(),
        None => {
            let mut buf = String::new();
            if let Err(e) = io::stdin().read_to_string(&mut buf) {
                tracing::error!(error = %e, "could not read request from stdin");
                return 1;
            }
            buf
        }
    };

    let client = Client::new(args.address(), Duration::from_millis(args.timeout_ms));
    match client.request_raw(payload.trim().as_bytes()) {
        Ok(Some(reply)) => {
            println!("{}", String::from_utf8_lossy(&reply));
            0
        }
        Ok(None) => {
            tracing::warn!(address = %args.address(), "no reply");
            0
        }
        Err(e) => {
            tracing::error!(address = %args.address(), error = %e, "request failed");
            1
        }
    }
}
