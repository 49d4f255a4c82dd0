//! Server configuration and CLI argument parsing
//!
//! Configuration follows this precedence order:
//! 1. CLI arguments (highest priority)
//! 2. Environment variables (GATECRAB_ prefix)
//! 3. Default values (lowest priority)
//!
//! # Example Usage
//!
//! ```bash
//! # Memory store, defaults everywhere
//! gatecrab
//!
//! # Redis store, fail closed, tighter auth limit
//! export GATECRAB_STORE=redis
//! export GATECRAB_REDIS_URL=redis://127.0.0.1/
//! gatecrab --fail-policy closed --auth-limit 5
//! ```

use crate::core::{FailurePolicy, Scope};
use anyhow::{Result, anyhow};
use clap::Parser;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure for the service
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind configuration
    pub server: ServerConfig,
    /// Counter store configuration
    pub store: StoreConfig,
    /// Behavior when the counter store is unreachable
    pub fail_policy: FailurePolicy,
    /// Per-scope windows and thresholds
    pub scopes: ScopeLimits,
    /// Logging level (error, warn, info, debug, trace)
    pub log_level: String,
}

/// HTTP bind configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

/// Counter store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Which backend holds the counters
    pub backend: StoreBackend,
    /// Redis connection URL (redis backend only)
    pub redis_url: Option<String>,
    /// Expected number of unique keys (memory backend)
    pub capacity: usize,
    /// Sweep interval for expired windows (memory backend)
    pub cleanup_interval: Duration,
    /// Per-operation deadline for remote store calls
    pub op_timeout: Duration,
}

/// Available counter store backends
///
/// - **Memory**: single-process only; no cross-process consistency
/// - **Redis**: shared atomic counters for multi-instance deployments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process map, for development and single-instance deployments
    Memory,
    /// Remote Redis counters, for multi-instance deployments
    Redis,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            _ => Err(anyhow!(
                "Invalid store backend: {}. Valid options are: memory, redis",
                s
            )),
        }
    }
}

/// One scope's window and threshold
#[derive(Debug, Clone, Copy)]
pub struct ScopeLimit {
    /// Maximum requests allowed per window
    pub max_requests: u64,
    /// Window duration
    pub window: Duration,
}

/// Windows and thresholds for every scope
#[derive(Debug, Clone)]
pub struct ScopeLimits {
    pub auth: ScopeLimit,
    pub admin: ScopeLimit,
    pub financial: ScopeLimit,
    pub signup: ScopeLimit,
    pub password_reset: ScopeLimit,
    pub token: ScopeLimit,
    pub sensitive: ScopeLimit,
    pub api: ScopeLimit,
    pub websocket: ScopeLimit,
}

impl ScopeLimits {
    /// The limit configured for a scope
    pub fn get(&self, scope: Scope) -> ScopeLimit {
        match scope {
            Scope::Auth => self.auth,
            Scope::Admin => self.admin,
            Scope::Financial => self.financial,
            Scope::Signup => self.signup,
            Scope::PasswordReset => self.password_reset,
            Scope::Token => self.token,
            Scope::Sensitive => self.sensitive,
            Scope::Api => self.api,
            Scope::WebSocket => self.websocket,
        }
    }
}

/// Command-line arguments for the service
///
/// All arguments can also be set via environment variables with the
/// GATECRAB_ prefix. CLI arguments take precedence over environment
/// variables.
#[derive(Parser, Debug)]
#[command(
    name = "gatecrab",
    about = "Scoped rate-limiting service",
    long_about = "A scoped rate-limiting service with pluggable counter stores.\n\nEnvironment variables with GATECRAB_ prefix are supported. CLI arguments take precedence over environment variables."
)]
pub struct Args {
    // HTTP server
    #[arg(
        long,
        value_name = "HOST",
        help = "HTTP host",
        default_value = "127.0.0.1",
        env = "GATECRAB_HOST"
    )]
    pub host: String,
    #[arg(
        long,
        value_name = "PORT",
        help = "HTTP port",
        default_value_t = 8080,
        env = "GATECRAB_PORT"
    )]
    pub port: u16,

    // Store configuration
    #[arg(
        long,
        value_name = "TYPE",
        help = "Store backend: memory, redis",
        default_value = "memory",
        env = "GATECRAB_STORE"
    )]
    pub store: StoreBackend,
    #[arg(
        long,
        value_name = "URL",
        help = "Redis connection URL (required for the redis backend)",
        env = "GATECRAB_REDIS_URL"
    )]
    pub redis_url: Option<String>,
    #[arg(
        long,
        value_name = "SIZE",
        help = "Expected unique keys for the memory store",
        default_value_t = 100_000,
        env = "GATECRAB_STORE_CAPACITY"
    )]
    pub store_capacity: usize,
    #[arg(
        long,
        value_name = "SECS",
        help = "Sweep interval for the memory store (seconds)",
        default_value_t = 300,
        env = "GATECRAB_STORE_CLEANUP_INTERVAL"
    )]
    pub store_cleanup_interval: u64,
    #[arg(
        long,
        value_name = "MS",
        help = "Per-operation deadline for remote store calls (milliseconds)",
        default_value_t = 1_000,
        env = "GATECRAB_STORE_OP_TIMEOUT_MS"
    )]
    pub store_op_timeout_ms: u64,

    // Failure policy
    #[arg(
        long,
        value_name = "POLICY",
        help = "Behavior when the store is unreachable: open, closed",
        default_value = "open",
        env = "GATECRAB_FAIL_POLICY"
    )]
    pub fail_policy: FailurePolicy,

    // Per-scope limits: <scope>-limit requests per <scope>-window seconds
    #[arg(long, value_name = "N", default_value_t = 10, env = "GATECRAB_AUTH_LIMIT")]
    pub auth_limit: u64,
    #[arg(long, value_name = "SECS", default_value_t = 60, env = "GATECRAB_AUTH_WINDOW")]
    pub auth_window: u64,
    #[arg(long, value_name = "N", default_value_t = 30, env = "GATECRAB_ADMIN_LIMIT")]
    pub admin_limit: u64,
    #[arg(long, value_name = "SECS", default_value_t = 60, env = "GATECRAB_ADMIN_WINDOW")]
    pub admin_window: u64,
    #[arg(long, value_name = "N", default_value_t = 10, env = "GATECRAB_FINANCIAL_LIMIT")]
    pub financial_limit: u64,
    #[arg(long, value_name = "SECS", default_value_t = 60, env = "GATECRAB_FINANCIAL_WINDOW")]
    pub financial_window: u64,
    #[arg(long, value_name = "N", default_value_t = 5, env = "GATECRAB_SIGNUP_LIMIT")]
    pub signup_limit: u64,
    #[arg(long, value_name = "SECS", default_value_t = 3_600, env = "GATECRAB_SIGNUP_WINDOW")]
    pub signup_window: u64,
    #[arg(long, value_name = "N", default_value_t = 3, env = "GATECRAB_PASSWORD_RESET_LIMIT")]
    pub password_reset_limit: u64,
    #[arg(
        long,
        value_name = "SECS",
        default_value_t = 3_600,
        env = "GATECRAB_PASSWORD_RESET_WINDOW"
    )]
    pub password_reset_window: u64,
    #[arg(long, value_name = "N", default_value_t = 30, env = "GATECRAB_TOKEN_LIMIT")]
    pub token_limit: u64,
    #[arg(long, value_name = "SECS", default_value_t = 60, env = "GATECRAB_TOKEN_WINDOW")]
    pub token_window: u64,
    #[arg(long, value_name = "N", default_value_t = 15, env = "GATECRAB_SENSITIVE_LIMIT")]
    pub sensitive_limit: u64,
    #[arg(long, value_name = "SECS", default_value_t = 60, env = "GATECRAB_SENSITIVE_WINDOW")]
    pub sensitive_window: u64,
    #[arg(long, value_name = "N", default_value_t = 100, env = "GATECRAB_API_LIMIT")]
    pub api_limit: u64,
    #[arg(long, value_name = "SECS", default_value_t = 60, env = "GATECRAB_API_WINDOW")]
    pub api_window: u64,
    #[arg(long, value_name = "N", default_value_t = 120, env = "GATECRAB_WEBSOCKET_LIMIT")]
    pub websocket_limit: u64,
    #[arg(long, value_name = "SECS", default_value_t = 60, env = "GATECRAB_WEBSOCKET_WINDOW")]
    pub websocket_window: u64,

    // General options
    #[arg(
        long,
        value_name = "LEVEL",
        help = "Log level: error, warn, info, debug, trace",
        default_value = "info",
        env = "GATECRAB_LOG_LEVEL"
    )]
    pub log_level: String,

    // Utility options
    #[arg(
        long,
        help = "List all environment variables and exit",
        action = clap::ArgAction::SetTrue
    )]
    pub list_env_vars: bool,
}

impl Config {
    /// Build configuration from environment variables and CLI arguments
    ///
    /// # Errors
    ///
    /// Returns an error if the redis backend is selected without a URL
    /// or any scope has a zero window or threshold.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();

        if args.list_env_vars {
            Self::print_env_vars();
            std::process::exit(0);
        }

        let config = Self::from_args(args)?;
        Ok(config)
    }

    /// Build and validate a configuration from parsed arguments
    pub fn from_args(args: Args) -> Result<Self> {
        let limit = |max_requests, window_secs| ScopeLimit {
            max_requests,
            window: Duration::from_secs(window_secs),
        };

        let config = Config {
            server: ServerConfig {
                host: args.host,
                port: args.port,
            },
            store: StoreConfig {
                backend: args.store,
                redis_url: args.redis_url,
                capacity: args.store_capacity,
                cleanup_interval: Duration::from_secs(args.store_cleanup_interval),
                op_timeout: Duration::from_millis(args.store_op_timeout_ms),
            },
            fail_policy: args.fail_policy,
            scopes: ScopeLimits {
                auth: limit(args.auth_limit, args.auth_window),
                admin: limit(args.admin_limit, args.admin_window),
                financial: limit(args.financial_limit, args.financial_window),
                signup: limit(args.signup_limit, args.signup_window),
                password_reset: limit(args.password_reset_limit, args.password_reset_window),
                token: limit(args.token_limit, args.token_window),
                sensitive: limit(args.sensitive_limit, args.sensitive_window),
                api: limit(args.api_limit, args.api_window),
                websocket: limit(args.websocket_limit, args.websocket_window),
            },
            log_level: args.log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// Malformed limiter configuration is fatal at process start, never
    /// surfaced per-request.
    fn validate(&self) -> Result<()> {
        if self.store.backend == StoreBackend::Redis && self.store.redis_url.is_none() {
            return Err(anyhow!(
                "Redis backend selected but no connection URL provided.\n\n\
                Set one with:\n  \
                gatecrab --store redis --redis-url redis://127.0.0.1/\n  \
                or GATECRAB_REDIS_URL=redis://127.0.0.1/"
            ));
        }

        for scope in Scope::ALL {
            let limit = self.scopes.get(scope);
            if limit.max_requests == 0 {
                return Err(anyhow!("scope {scope}: limit must be greater than zero"));
            }
            if limit.window.is_zero() {
                return Err(anyhow!("scope {scope}: window must be greater than zero"));
            }
        }

        if self.store.op_timeout.is_zero() {
            return Err(anyhow!("store operation timeout must be greater than zero"));
        }

        Ok(())
    }

    /// Print all available environment variables and their descriptions
    fn print_env_vars() {
        println!("Gatecrab Environment Variables");
        println!("==============================");
        println!();
        println!("All environment variables use the GATECRAB_ prefix.");
        println!("CLI arguments take precedence over environment variables.");
        println!();

        println!("Server Configuration:");
        println!("  GATECRAB_HOST=<host>                  HTTP host [default: 127.0.0.1]");
        println!("  GATECRAB_PORT=<port>                  HTTP port [default: 8080]");
        println!();

        println!("Store Configuration:");
        println!("  GATECRAB_STORE=memory|redis           Store backend [default: memory]");
        println!("  GATECRAB_REDIS_URL=<url>              Redis URL (redis backend)");
        println!("  GATECRAB_STORE_CAPACITY=<size>        Memory store capacity [default: 100000]");
        println!(
            "  GATECRAB_STORE_CLEANUP_INTERVAL=<secs> Memory store sweep interval [default: 300]"
        );
        println!(
            "  GATECRAB_STORE_OP_TIMEOUT_MS=<ms>     Remote store deadline [default: 1000]"
        );
        println!();

        println!("Failure Policy:");
        println!("  GATECRAB_FAIL_POLICY=open|closed      Store-outage behavior [default: open]");
        println!();

        println!("Per-Scope Limits (requests per window):");
        for scope in Scope::ALL {
            let upper = scope.as_str().to_uppercase();
            println!("  GATECRAB_{upper}_LIMIT=<n>  GATECRAB_{upper}_WINDOW=<secs>");
        }
        println!();

        println!("General Configuration:");
        println!(
            "  GATECRAB_LOG_LEVEL=<level>            Log level: error, warn, info, debug, trace [default: info]"
        );
    }
}
