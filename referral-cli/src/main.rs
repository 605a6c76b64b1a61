//! Referral Command Line Interface
//!
//! Configuration is loaded from environment variables (via .env file).
//! Command-line arguments override environment variables.
//!
//! Usage:
//!   referral start              - Start the referral API server
//!   referral code create        - Create a referral code
//!   referral code deactivate    - Deactivate a referral code
//!   referral redeem <code>      - Redeem a code
//!   referral claim <id>         - Link an anonymous referral to a user
//!   referral complete <user>    - Apply rewards for an invitee
//!   referral validate <code>    - Check a code before signup
//!   referral show <user>        - Show a user's referrals and credits
//!   referral token <user>       - Issue a user token for the API
//!   referral user add <id>      - Add a profile to the user directory
//!
//! Without `--data-dir` every invocation runs against a fresh in-memory
//! ledger, so only `start` is useful in that mode. With `--data-dir` user
//! profiles live in the same sled database; `--users-file` seeds them from a
//! JSON array on every start.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "referral")]
#[command(about = "Referral reward ledger CLI")]
#[command(version)]
pub struct Cli {
    /// Sled data directory; empty selects the in-memory backend
    #[arg(long, env = "REFERRAL_DATA_DIR", default_value = "", global = true)]
    data_dir: String,

    /// JSON array of user profiles loaded into the user directory
    #[arg(long, env = "REFERRAL_USERS_FILE", global = true)]
    users_file: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the referral API server
    Start {
        /// Address to listen on
        #[arg(short, long, env = "REFERRAL_API_LISTEN_ADDR")]
        listen: Option<String>,
    },

    /// Manage referral codes
    Code {
        #[command(subcommand)]
        action: CodeCommands,
    },

    /// Redeem a referral code
    Redeem {
        /// Referral code
        code: String,
        /// Redeeming user; omit for an anonymous redemption
        #[arg(short, long)]
        user: Option<String>,
        /// Invitee email
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Link an anonymous referral to a user
    Claim {
        /// Referral ID
        referral_id: String,
        /// Claiming user
        #[arg(short, long)]
        user: String,
    },

    /// Apply rewards for an invitee's pending referral
    Complete {
        /// Invitee user ID
        invitee: String,
        /// Triggering event
        #[arg(short, long, default_value = "email_verified")]
        event_type: String,
    },

    /// Check a code before signup
    Validate {
        /// Referral code
        code: String,
    },

    /// Show a user's referrals, rewards and credit balance
    Show {
        /// User ID
        user: String,
    },

    /// Manage user profiles
    User {
        #[command(subcommand)]
        action: UserCommands,
    },

    /// Issue a user token signed with JWT_SECRET
    Token {
        /// User ID
        user: String,
        /// Token lifetime in hours
        #[arg(long, default_value = "24")]
        ttl_hours: i64,
    },
}

#[derive(Subcommand)]
pub enum CodeCommands {
    /// Create a referral code
    Create {
        /// Code owner
        #[arg(short, long)]
        inviter: String,
        /// Maximum redemptions, 0 = unlimited
        #[arg(short, long, default_value = "0")]
        usage_limit: u32,
        /// Days until the code expires
        #[arg(long)]
        expires_in_days: Option<i64>,
        /// Campaign tag
        #[arg(long)]
        campaign: Option<String>,
    },
    /// Deactivate a referral code
    Deactivate {
        /// Referral code
        code: String,
        /// Code owner
        #[arg(short, long)]
        inviter: String,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Insert or replace a user profile
    Add {
        /// User ID
        id: String,
        /// Display username
        #[arg(short, long)]
        username: String,
        /// First name
        #[arg(long)]
        first_name: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if cli.verbose || matches!(cli.command, Commands::Start { .. }) {
        init_logging();
    }

    if let Err(e) = commands::run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize logging with tracing
fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "referral_cli=info,referral_api=info,referral_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
