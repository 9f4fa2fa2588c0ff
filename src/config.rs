use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::amount::AmountConverter;
use crate::retry::RetryConfig;
use crate::signer::CustodySigner;

/// Main configuration for the relayer
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub custody: CustodyConfig,
    pub relay: RelayConfig,
    pub api: ApiConfig,
}

/// Database configuration
#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

/// Source chain (Substrate API sidecar) configuration
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub api_url: String,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    /// Most heights fetched by number when finality jumps ahead
    pub max_backfill_blocks: u64,
    /// Qualified `section.method` of the bridge transfer event
    pub event_method: String,
    /// Expected value of the event's first data field
    pub transfer_discriminant: String,
    pub decimals: u32,
}

/// Destination chain (MultiversX gateway) configuration
#[derive(Debug, Clone)]
pub struct DestinationConfig {
    pub gateway_url: String,
    pub token_identifier: String,
    pub decimals: u32,
    pub gas_limit: u64,
    pub request_timeout_ms: u64,
    /// Bech32 human-readable prefix of account addresses
    pub address_hrp: String,
}

/// Custody account key material
#[derive(Clone)]
pub struct CustodyConfig {
    pub secret_key: String,
}

/// Custom Debug that redacts secret_key to prevent accidental log leakage.
impl fmt::Debug for CustodyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustodyConfig")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Retry and confirmation policy
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub retry_attempts: u32,
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    pub confirmation_timeout_secs: u64,
    pub confirmation_poll_interval_ms: u64,
}

/// Status API configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
}

/// Default functions
fn default_poll_interval() -> u64 {
    6000
}

fn default_request_timeout() -> u64 {
    30000
}

fn default_max_backfill_blocks() -> u64 {
    64
}

fn default_event_method() -> String {
    "chainBridge.FungibleTransfer".to_string()
}

fn default_transfer_discriminant() -> String {
    "100".to_string()
}

fn default_source_decimals() -> u32 {
    12
}

fn default_token_identifier() -> String {
    "CRU-a5f4aa".to_string()
}

fn default_dest_decimals() -> u32 {
    18
}

fn default_gas_limit() -> u64 {
    500_000
}

fn default_address_hrp() -> String {
    "erd".to_string()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_initial_backoff() -> u64 {
    2000
}

fn default_retry_max_backoff() -> u64 {
    60000
}

fn default_confirmation_timeout() -> u64 {
    180
}

fn default_confirmation_poll_interval() -> u64 {
    6000
}

fn default_bind_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| eyre!("{} environment variable is required", name))
}

fn optional<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| eyre!("{} has an invalid value {:?}: {}", name, raw, e)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        let database = DatabaseConfig {
            url: required("DATABASE_URL")?,
        };

        let source = SourceConfig {
            api_url: required("SOURCE_API_URL")?,
            poll_interval_ms: optional("SOURCE_POLL_INTERVAL_MS", default_poll_interval())?,
            request_timeout_ms: optional("SOURCE_REQUEST_TIMEOUT_MS", default_request_timeout())?,
            max_backfill_blocks: optional(
                "SOURCE_MAX_BACKFILL_BLOCKS",
                default_max_backfill_blocks(),
            )?,
            event_method: optional("BRIDGE_EVENT_METHOD", default_event_method())?,
            transfer_discriminant: optional(
                "BRIDGE_TRANSFER_DISCRIMINANT",
                default_transfer_discriminant(),
            )?,
            decimals: optional("SOURCE_DECIMALS", default_source_decimals())?,
        };

        let destination = DestinationConfig {
            gateway_url: required("DEST_GATEWAY_URL")?,
            token_identifier: optional("DEST_TOKEN_IDENTIFIER", default_token_identifier())?,
            decimals: optional("DEST_DECIMALS", default_dest_decimals())?,
            gas_limit: optional("DEST_GAS_LIMIT", default_gas_limit())?,
            request_timeout_ms: optional("DEST_REQUEST_TIMEOUT_MS", default_request_timeout())?,
            address_hrp: optional("DEST_ADDRESS_HRP", default_address_hrp())?,
        };

        let custody = CustodyConfig {
            secret_key: required("CUSTODY_SECRET_KEY")?,
        };

        let relay = RelayConfig {
            retry_attempts: optional("RETRY_ATTEMPTS", default_retry_attempts())?,
            retry_initial_backoff_ms: optional(
                "RETRY_INITIAL_BACKOFF_MS",
                default_retry_initial_backoff(),
            )?,
            retry_max_backoff_ms: optional("RETRY_MAX_BACKOFF_MS", default_retry_max_backoff())?,
            confirmation_timeout_secs: optional(
                "CONFIRMATION_TIMEOUT_SECS",
                default_confirmation_timeout(),
            )?,
            confirmation_poll_interval_ms: optional(
                "CONFIRMATION_POLL_INTERVAL_MS",
                default_confirmation_poll_interval(),
            )?,
        };

        let api = ApiConfig {
            bind_addr: optional("API_BIND_ADDR", default_bind_addr())?,
        };

        let config = Config {
            database,
            source,
            destination,
            custody,
            relay,
            api,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }

        for (name, url) in [
            ("source.api_url", &self.source.api_url),
            ("destination.gateway_url", &self.destination.gateway_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(eyre!("{} must be an http(s) URL, got {:?}", name, url));
            }
        }

        if !self.source.event_method.contains('.') {
            return Err(eyre!(
                "source.event_method must be a qualified section.method name"
            ));
        }

        if self.source.max_backfill_blocks == 0 {
            return Err(eyre!("source.max_backfill_blocks must be at least 1"));
        }

        if self.destination.token_identifier.is_empty() {
            return Err(eyre!("destination.token_identifier cannot be empty"));
        }

        if self.destination.address_hrp.is_empty() {
            return Err(eyre!("destination.address_hrp cannot be empty"));
        }

        AmountConverter::new(self.source.decimals, self.destination.decimals)
            .wrap_err("source/destination decimals are not a supported conversion")?;

        // Fails on malformed key material without keeping the signer around
        CustodySigner::from_hex(&self.custody.secret_key, &self.destination.address_hrp)
            .wrap_err("custody.secret_key is not a valid ed25519 secret key")?;

        if self.relay.retry_attempts == 0 {
            return Err(eyre!("relay.retry_attempts must be at least 1"));
        }

        if self.relay.retry_max_backoff_ms < self.relay.retry_initial_backoff_ms {
            return Err(eyre!(
                "relay.retry_max_backoff_ms cannot be lower than relay.retry_initial_backoff_ms"
            ));
        }

        if self.relay.confirmation_timeout_secs == 0 {
            return Err(eyre!("relay.confirmation_timeout_secs must be at least 1"));
        }

        if self.source.poll_interval_ms == 0 || self.relay.confirmation_poll_interval_ms == 0 {
            return Err(eyre!("poll intervals must be greater than zero"));
        }

        self.api
            .bind_addr
            .parse::<std::net::SocketAddr>()
            .wrap_err_with(|| format!("api.bind_addr {:?} is not a socket address", self.api.bind_addr))?;

        Ok(())
    }
}

impl RelayConfig {
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry_attempts,
            initial_backoff: Duration::from_millis(self.retry_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry_max_backoff_ms),
            ..RetryConfig::default()
        }
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn confirmation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirmation_poll_interval_ms)
    }
}
