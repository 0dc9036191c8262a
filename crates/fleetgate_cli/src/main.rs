//! Fleetgate CLI
//!
//! Runs the sync server and gives operators direct access to the store.
//!
//! # Commands
//!
//! - `serve` - Run the sync gateway and governance API
//! - `propose` - Create a proposal
//! - `approve` - Finalize a proposal with a chosen policy
//! - `token` - Mint an API token
//! - `inspect` - Show a device, a proposal or a page of rules

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use commands::serve::ServeOptions;
use commands::token::TokenOptions;
use fleetgate_protocol::{ClientMode, Policy, RuleType};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Sync gateway for endpoint-security agents.
#[derive(Parser)]
#[command(name = "fleetgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the SQLite database
    #[arg(global = true, short, long, env = "FLEETGATE_DB")]
    db: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for `inspect`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync gateway and governance API
    Serve {
        /// Address to listen on
        #[arg(short, long, env = "FLEETGATE_BIND", default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Same-side votes that decide a proposal
        #[arg(
            long,
            env = "FLEETGATE_VOTE_THRESHOLD",
            default_value_t = fleetgate_governance::DEFAULT_VOTE_THRESHOLD
        )]
        threshold: u32,

        /// Shared secret for HS256 tokens
        #[arg(long, env = "FLEETGATE_JWT_SECRET", hide_env_values = true)]
        secret: Option<String>,

        /// Hex Ed25519 public key for EdDSA tokens
        #[arg(long, env = "FLEETGATE_JWT_PUBLIC_KEY")]
        public_key: Option<String>,

        /// Expected token issuer
        #[arg(long, env = "FLEETGATE_JWT_ISSUER", default_value = "fleetgate")]
        issuer: String,

        /// Reject tokens without a live session
        #[arg(long, env = "FLEETGATE_REQUIRE_SESSION")]
        require_session: bool,

        /// Mode agents are told to run in
        #[arg(long, env = "FLEETGATE_CLIENT_MODE", default_value = "LOCKDOWN")]
        client_mode: ClientMode,

        /// Events per upload batch
        #[arg(long, env = "FLEETGATE_BATCH_SIZE", default_value_t = 100)]
        batch_size: u32,

        /// Rules per download page
        #[arg(long, env = "FLEETGATE_RULE_PAGE_SIZE", default_value_t = 100)]
        page_size: usize,
    },

    /// Create a proposal
    Propose {
        /// Hash, team id or signing id the rule will match
        identifier: String,

        /// What the identifier refers to
        #[arg(short, long, default_value = "BINARY")]
        rule_type: RuleType,

        /// Requested policy
        #[arg(short, long, default_value = "ALLOWLIST")]
        policy: Policy,

        /// Rationale, shown to users when the rule blocks
        #[arg(short, long)]
        message: Option<String>,

        /// Id of the proposing user
        #[arg(long, default_value_t = 0)]
        created_by: i64,
    },

    /// Finalize a proposal with a chosen policy
    Approve {
        /// Proposal id
        proposal_id: i64,

        /// Policy of the resulting rule
        #[arg(short, long)]
        policy: Policy,
    },

    /// Mint an API token and record its session
    Token {
        /// User id
        #[arg(long)]
        user_id: i64,

        /// Display name
        #[arg(long)]
        username: String,

        /// Grant the admin role
        #[arg(long)]
        admin: bool,

        /// Email claim
        #[arg(long)]
        email: Option<String>,

        /// Shared secret for HS256 tokens
        #[arg(long, env = "FLEETGATE_JWT_SECRET", hide_env_values = true)]
        secret: String,

        /// Token issuer
        #[arg(long, env = "FLEETGATE_JWT_ISSUER", default_value = "fleetgate")]
        issuer: String,

        /// Lifetime in hours
        #[arg(long, default_value_t = 24)]
        hours: u64,
    },

    /// Show a device, a proposal or a page of rules
    Inspect {
        #[command(subcommand)]
        target: InspectTarget,

        /// Output format
        #[arg(global = true, short, long, value_enum, default_value = "text")]
        format: Format,
    },
}

#[derive(Subcommand)]
enum InspectTarget {
    /// One device, or all devices
    Device {
        /// Device id
        id: Option<String>,
    },
    /// One proposal with its votes
    Proposal {
        /// Proposal id
        id: i64,
    },
    /// Rules after a cursor, as agents page through them
    Rules {
        /// Last rule id already seen
        #[arg(short, long, default_value_t = 0)]
        cursor: i64,

        /// Page size
        #[arg(short, long, default_value_t = 100)]
        limit: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            bind,
            threshold,
            secret,
            public_key,
            issuer,
            require_session,
            client_mode,
            batch_size,
            page_size,
        } => {
            commands::serve::run(
                cli.db.as_deref(),
                ServeOptions {
                    bind,
                    threshold,
                    secret,
                    public_key,
                    issuer,
                    require_session,
                    client_mode,
                    batch_size,
                    page_size,
                },
            )?;
        }
        Commands::Propose {
            identifier,
            rule_type,
            policy,
            message,
            created_by,
        } => {
            let path = cli.db.ok_or("Database path required for propose")?;
            commands::propose::run(&path, identifier, rule_type, policy, message, created_by)?;
        }
        Commands::Approve {
            proposal_id,
            policy,
        } => {
            let path = cli.db.ok_or("Database path required for approve")?;
            commands::approve::run(&path, proposal_id, policy)?;
        }
        Commands::Token {
            user_id,
            username,
            admin,
            email,
            secret,
            issuer,
            hours,
        } => {
            let path = cli.db.ok_or("Database path required for token")?;
            commands::token::run(
                &path,
                TokenOptions {
                    user_id,
                    username,
                    admin,
                    email,
                    secret,
                    issuer,
                    hours,
                },
            )?;
        }
        Commands::Inspect { target, format } => {
            let path = cli.db.ok_or("Database path required for inspect")?;
            let json = format == Format::Json;
            match target {
                InspectTarget::Device { id } => {
                    commands::inspect::device(&path, id.as_deref(), json)?
                }
                InspectTarget::Proposal { id } => commands::inspect::proposal(&path, id, json)?,
                InspectTarget::Rules { cursor, limit } => {
                    commands::inspect::rules(&path, cursor, limit, json)?
                }
            }
        }
    }

    Ok(())
}
