use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bulkreg", about = "Concurrent bulk account registration")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register generated identities
    Register {
        /// Number of accounts
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,

        /// Attempts running at once (overrides general.concurrency)
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Fixed display name for every account
        #[arg(long)]
        name: Option<String>,

        /// Catch-all domain for generated addresses (overrides identity.email_domain)
        #[arg(short, long)]
        domain: Option<String>,

        /// Output file for the JSON snapshot
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Register identities read from a JSON file
    Import {
        /// JSON array of identities
        file: String,

        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        #[arg(short, long)]
        output: Option<String>,
    },
    /// Log in to a mailbox and count matching messages
    ProbeMailbox {
        /// Own mailbox address; the configured collector mailbox when omitted
        #[arg(long)]
        email: Option<String>,

        /// Mailbox password or app password for --email
        #[arg(long)]
        password: Option<String>,

        /// Only count messages from this sender
        #[arg(long)]
        sender: Option<String>,
    },
}
