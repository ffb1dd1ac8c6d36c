mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// mimalloc returns freed memory to the OS under many concurrent sessions
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use bulkreg_core::config::AppConfig;
use bulkreg_core::{AccountRequest, IdentitySource, IdentityTemplate};

use crate::cli::{Cli, Commands};

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(8)
        // IMAP commands run on the blocking pool
        .max_blocking_threads(256)
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true))
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn async_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, using defaults");
        include_str!("../config/default.toml").to_string()
    });
    let mut config: AppConfig = toml::from_str(&config_str)?;

    // Environment variable overrides
    let parse_concurrency =
        |v: &str| -> Option<usize> { v.parse::<usize>().ok().filter(|&n| n > 0 && n <= 256) };

    if let Ok(v) = std::env::var("BULKREG_CONCURRENCY") {
        if let Some(n) = parse_concurrency(&v) {
            config.general.concurrency = n;
        }
    }
    if let Ok(v) = std::env::var("BULKREG_MAILBOX_PASSWORD") {
        config.mailbox.password = v;
    }
    if let Ok(v) = std::env::var("BULKREG_CIPHER_KEY") {
        config.target.cipher_key = v;
    }
    if let Ok(v) = std::env::var("BULKREG_TARGET_URL") {
        config.target.base_url = v;
    }

    config.validate()?;
    info!(target = %config.target.name, base_url = %config.target.base_url, "config loaded");

    match cli.command {
        Commands::Register {
            count,
            concurrency,
            name,
            domain,
            output,
        } => {
            let request = AccountRequest {
                identities: IdentitySource::Generated {
                    template: IdentityTemplate {
                        name: name.or_else(|| config.identity.name.clone()),
                        birthdate: config.identity.birthdate,
                        country: config.identity.country.clone(),
                        gender: config.identity.gender.clone(),
                    },
                    count,
                },
                email_domain: domain.or_else(|| config.identity.email_domain.clone()),
                concurrency: concurrency.unwrap_or(config.general.concurrency),
            };
            commands::register::run(config, request, output).await?;
        }
        Commands::Import {
            file,
            concurrency,
            output,
        } => {
            let identities = commands::load_identities(&file)?;
            let request = AccountRequest {
                identities: IdentitySource::Imported(identities),
                email_domain: config.identity.email_domain.clone(),
                concurrency: concurrency.unwrap_or(config.general.concurrency),
            };
            commands::register::run(config, request, output).await?;
        }
        Commands::ProbeMailbox {
            email,
            password,
            sender,
        } => {
            commands::run_probe(config, email, password, sender).await?;
        }
    }

    Ok(())
}
