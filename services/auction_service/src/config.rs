//! Configuration for the auction service.
//!
//! Layered through the `config` crate, lowest to highest priority:
//!
//! 1. Compile-time defaults (`impl Default`).
//! 2. An optional TOML/YAML/JSON file passed at start-up.
//! 3. Environment variables with `COPPERGAVEL_` prefix.
//!
//!     COPPERGAVEL__AUCTION__EXTENSION_WINDOW=5m   # double underscore = path separator
//!
//! The frozen [`AuctionConfig`] is published as a global singleton through
//! [`get()`].  All durations accept humane strings (`5m`, `90s`, `1h`).

use std::{
    net::{IpAddr, Ipv4Addr},
    path::Path,
    sync::Arc,
    time::Duration,
};

use config::{Config, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::auction_closer::CloserPolicy;
use crate::bid_ledger::LedgerPolicy;
use crate::domain::ExtensionPolicy;
use crate::offer_desk::DeskPolicy;

static AUCTION_CONFIG: OnceCell<Arc<AuctionConfig>> = OnceCell::new();

pub type ConfigHandle = Arc<AuctionConfig>;

/// Initialise the configuration singleton.
///
/// `config_path` is an optional explicit path; when `None` the loader looks
/// for `auction.{toml,yaml,json}` in the working directory.
///
/// # Errors
/// IO failures, malformed values, failed validation, or calling `init`
/// twice.
pub fn init(config_path: Option<impl AsRef<Path>>) -> Result<ConfigHandle, ConfigError> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        builder = builder.add_source(File::from(path.as_ref()).required(true));
    } else {
        for ext in ["toml", "yaml", "json"] {
            let file_name = format!("auction.{ext}");
            if Path::new(&file_name).exists() {
                builder = builder.add_source(File::with_name(&file_name).required(false));
                break;
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("COPPERGAVEL")
            .separator("__")
            .try_parsing(true),
    );

    let configuration = builder.build()?;
    let config: AuctionConfig = configuration.try_deserialize()?;
    config
        .validate()
        .map_err(|e| ConfigError::Message(e.to_string()))?;

    let arc = Arc::new(config);
    AUCTION_CONFIG
        .set(arc.clone())
        .map_err(|_| ConfigError::Message("Configuration already initialised".into()))?;
    Ok(arc)
}

/// Immutable access to the frozen config. Panics before [`init`].
#[inline(always)]
pub fn get() -> &'static AuctionConfig {
    AUCTION_CONFIG
        .get()
        .expect("Configuration accessed before initialisation")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuctionConfig {
    pub service: ServiceConfig,
    pub network: NetworkConfig,
    pub auction: AuctionRules,
    pub sweeps: SweepConfig,
}

impl AuctionConfig {
    /// Sanity checks; prefer an error over silently fixing values.
    pub fn validate(&self) -> Result<(), String> {
        if self.auction.extension_window > self.auction.extension_duration {
            return Err(
                "auction.extension_window must not exceed auction.extension_duration".into(),
            );
        }
        if self.auction.write_retry_limit > 32 {
            return Err("auction.write_retry_limit is unrealistically high".into());
        }
        if self.auction.store_op_timeout < Duration::from_millis(100) {
            return Err("auction.store_op_timeout is unrealistically low".into());
        }
        if self.sweeps.close_interval < Duration::from_secs(1) {
            return Err("sweeps.close_interval is unrealistically low".into());
        }
        if self.sweeps.ending_soon_horizon.is_zero() {
            return Err("sweeps.ending_soon_horizon must be > 0".into());
        }
        Ok(())
    }

    pub fn ledger_policy(&self) -> LedgerPolicy {
        LedgerPolicy {
            extension: self.extension_policy(),
            write_retry_limit: self.auction.write_retry_limit,
            store_op_timeout: self.auction.store_op_timeout,
        }
    }

    pub fn closer_policy(&self) -> CloserPolicy {
        CloserPolicy {
            ending_soon_horizon: chrono::Duration::from_std(self.sweeps.ending_soon_horizon)
                .unwrap_or_else(|_| chrono::Duration::minutes(10)),
            settle_retry_limit: self.auction.write_retry_limit,
        }
    }

    pub fn desk_policy(&self) -> DeskPolicy {
        DeskPolicy {
            settle_retry_limit: self.auction.write_retry_limit,
        }
    }

    fn extension_policy(&self) -> ExtensionPolicy {
        ExtensionPolicy {
            window: chrono::Duration::from_std(self.auction.extension_window)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
            extension: chrono::Duration::from_std(self.auction.extension_duration)
                .unwrap_or_else(|_| chrono::Duration::minutes(10)),
        }
    }
}

/// Metadata and housekeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Logical service name, appears in logs.
    pub name: String,
    /// Graceful shutdown timeout.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "coppergavel-auction".into(),
            shutdown_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// The IP address to bind the HTTP API to.
    pub host: IpAddr,
    pub http_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_port: 8080,
        }
    }
}

/// The bidding rules themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuctionRules {
    /// A bid landing inside this window of the end time extends the auction.
    #[serde(with = "humantime_serde")]
    pub extension_window: Duration,
    /// How far past "now" an extension pushes the end time.
    #[serde(with = "humantime_serde")]
    pub extension_duration: Duration,
    /// CAS conflicts absorbed per write before reporting contention.
    pub write_retry_limit: u32,
    /// Upper bound for a single store operation.
    #[serde(with = "humantime_serde")]
    pub store_op_timeout: Duration,
}

impl Default for AuctionRules {
    fn default() -> Self {
        Self {
            extension_window: Duration::from_secs(5 * 60),
            extension_duration: Duration::from_secs(10 * 60),
            write_retry_limit: 4,
            store_op_timeout: Duration::from_secs(3),
        }
    }
}

/// Background sweep cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// How often expired lots are settled.
    #[serde(with = "humantime_serde")]
    pub close_interval: Duration,
    /// How often the ending-soon notifier runs.
    #[serde(with = "humantime_serde")]
    pub ending_soon_interval: Duration,
    /// Lots ending within this horizon get the notice.
    #[serde(with = "humantime_serde")]
    pub ending_soon_horizon: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            close_interval: Duration::from_secs(60),
            ending_soon_interval: Duration::from_secs(5 * 60),
            ending_soon_horizon: Duration::from_secs(10 * 60),
        }
    }
}
