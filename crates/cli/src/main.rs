//! Marketsync CLI - Drive the session engine from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Show the stored session
//! msync status
//!
//! # Exchange a provider token for a backend session
//! msync login --provider-token "$TOKEN" --wallet 0xabc...
//!
//! # Add to the cart (guest cart when signed out)
//! msync cart add sku-123 -q 2
//!
//! # Admin panel session
//! msync admin login -e ops@example.com
//! ```
//!
//! # Commands
//!
//! - `status` - Show the persisted and live session state
//! - `login` / `logout` - User session lifecycle
//! - `cart add|remove|show`, `wishlist show` - User resources
//! - `admin login|logout` - Admin session lifecycle

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use clap::{Parser, Subcommand};
use marketsync_session::{FileStore, SessionConfig, SessionCoordinator, StaticTokenProvider};
use secrecy::SecretString;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "msync")]
#[command(author, version, about = "Marketsync session CLI")]
struct Cli {
    /// Access token issued by the identity provider
    #[arg(long, global = true, env = "MARKETSYNC_PROVIDER_TOKEN", hide_env_values = true)]
    provider_token: Option<String>,

    /// Wallet address reported by the provider
    #[arg(long, global = true, env = "MARKETSYNC_WALLET_ADDRESS")]
    wallet: Option<String>,

    /// Email reported by the provider
    #[arg(long, global = true)]
    email: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current session state
    Status,
    /// Exchange the provider token for a backend session
    Login,
    /// End the user session
    Logout,
    /// Manage the cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
    /// Manage the wishlist
    Wishlist {
        #[command(subcommand)]
        action: WishlistAction,
    },
    /// Manage the admin-panel session
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// Add a product to the cart
    Add {
        /// Product id
        product_id: String,

        /// Quantity to add
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,
    },
    /// Remove a product from the guest cart
    Remove {
        /// Product id
        product_id: String,
    },
    /// Show the cart
    Show,
}

#[derive(Subcommand)]
enum WishlistAction {
    /// Show the wishlist
    Show,
}

#[derive(Subcommand)]
enum AdminAction {
    /// Sign in to the admin panel
    Login {
        /// Admin email address
        #[arg(short, long)]
        email: String,

        /// Admin password
        #[arg(long, env = "MARKETSYNC_ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// End the admin-panel session
    Logout,
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &SessionConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    Some(guard)
}

/// Map tracing levels to Sentry: warnings and errors become events, the rest
/// breadcrumbs.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = SessionConfig::from_env().expect("Failed to load configuration");

    let _sentry_guard = init_sentry(&config);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "marketsync_session=info,marketsync_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli, &config).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &SessionConfig) -> Result<(), Box<dyn std::error::Error>> {
    let provider = Arc::new(StaticTokenProvider::new(
        cli.provider_token.map(SecretString::from),
        commands::provider_profile(cli.email.as_deref(), cli.wallet.as_deref())?,
    ));
    let store = Arc::new(FileStore::new(&config.store_path));
    let coordinator = SessionCoordinator::connect(config, store, provider)?;

    match cli.command {
        Commands::Status => commands::session::status(&coordinator).await,
        Commands::Login => commands::session::login(&coordinator).await?,
        Commands::Logout => commands::session::logout(&coordinator).await?,
        Commands::Cart { action } => match action {
            CartAction::Add {
                product_id,
                quantity,
            } => commands::cart::add(&coordinator, &product_id, quantity).await?,
            CartAction::Remove { product_id } => {
                commands::cart::remove(&coordinator, &product_id).await?;
            }
            CartAction::Show => commands::cart::show(&coordinator).await?,
        },
        Commands::Wishlist { action } => match action {
            WishlistAction::Show => commands::cart::show_wishlist(&coordinator).await?,
        },
        Commands::Admin { action } => match action {
            AdminAction::Login { email, password } => {
                commands::admin::login(&coordinator, &email, SecretString::from(password)).await?;
            }
            AdminAction::Logout => commands::admin::logout(&coordinator).await?,
        },
    }
    Ok(())
}
