use std::{env, fmt::Display, io::Write, str::FromStr, time::Duration};

use delivery_engine::{RetryPolicy, SettlementPolicy};
use dlv_common::{
    helpers::{parse_boolean_flag, parse_optional},
    Money,
    Secret,
};
use log::*;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use serde_json::json;
use tempfile::NamedTempFile;

use crate::errors::ServerError;

const DEFAULT_DLV_HOST: &str = "127.0.0.1";
const DEFAULT_DLV_PORT: u16 = 8470;
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 60 * 24);
const DEFAULT_EXPIRY_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_ROLLUP_INTERVAL_HOURS: u64 = 24 * 7;
const DEFAULT_HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub auth: AuthConfig,
    /// The money rules handed to every engine API.
    pub policy: SettlementPolicy,
    pub retry: RetryPolicy,
    pub workers: WorkerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_DLV_HOST.to_string(),
            port: DEFAULT_DLV_PORT,
            database_url: String::default(),
            auth: AuthConfig::default(),
            policy: SettlementPolicy::default(),
            retry: RetryPolicy::default(),
            workers: WorkerConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("DLV_HOST").ok().unwrap_or_else(|| DEFAULT_DLV_HOST.into());
        let port = env_or_default("DLV_PORT", DEFAULT_DLV_PORT);
        let database_url = env::var("DLV_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ DLV_DATABASE_URL is not set. Please set it to the URL for the marketplace database.");
            String::default()
        });
        let auth = AuthConfig::try_from_env().unwrap_or_else(|e| {
            warn!(
                "🪛️ Could not load the authentication configuration from environment variables. {e}. Reverting to the \
                 default configuration."
            );
            AuthConfig::default()
        });
        let policy = configure_policy();
        let defaults = RetryPolicy::default();
        let max_attempts = env_or_default("DLV_RETRY_MAX_ATTEMPTS", defaults.max_attempts);
        let retry = RetryPolicy::new(max_attempts, defaults.base_delay, defaults.max_delay);
        let workers = WorkerConfig::from_env_or_default();
        Self { host, port, database_url, auth, policy, retry, workers }
    }
}

/// Reads `name` from the environment. Missing values fall back silently to `default`, and unparseable ones fall back
/// with a warning.
fn env_or_default<T>(name: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match parse_optional::<T>(env::var(name).ok()) {
        Ok(Some(value)) => value,
        Ok(None) => {
            debug!("🪛️ {name} is not set. Using the default value of {default}.");
            default
        },
        Err(e) => {
            warn!("🪛️ Invalid configuration value for {name}. {e} Using the default, {default}, instead.");
            default
        },
    }
}

fn env_money_or_default(name: &str, default: Money) -> Money {
    Money::from(env_or_default(name, default.value()))
}

fn configure_policy() -> SettlementPolicy {
    let d = SettlementPolicy::default();
    let commission_bps = env_or_default("DLV_COMMISSION_BPS", d.commission_bps);
    let courier_fee_share_bps = env_or_default("DLV_COURIER_FEE_SHARE_BPS", d.courier_fee_share_bps);
    let policy = SettlementPolicy {
        commission_bps: valid_bps("DLV_COMMISSION_BPS", commission_bps, d.commission_bps),
        courier_fee_share_bps: valid_bps("DLV_COURIER_FEE_SHARE_BPS", courier_fee_share_bps, d.courier_fee_share_bps),
        courier_payout_floor: env_money_or_default("DLV_COURIER_PAYOUT_FLOOR", d.courier_payout_floor),
        restaurant_payout_floor: env_money_or_default("DLV_RESTAURANT_PAYOUT_FLOOR", d.restaurant_payout_floor),
        remittance_tolerance: env_money_or_default("DLV_REMITTANCE_TOLERANCE", d.remittance_tolerance),
        unaccepted_order_timeout_minutes: env_or_default(
            "DLV_UNACCEPTED_ORDER_TIMEOUT",
            d.unaccepted_order_timeout_minutes,
        ),
    };
    info!("🪛️ Settlement policy: {policy:?}");
    policy
}

fn valid_bps(name: &str, value: i64, default: i64) -> i64 {
    if (0..=10_000).contains(&value) {
        value
    } else {
        warn!("🪛️ {name} must be between 0 and 10000 basis points, but was {value}. Using {default} instead.");
        default
    }
}

//-------------------------------------------------  WorkerConfig  -----------------------------------------------------
/// How often the background settlement passes run.
#[derive(Clone, Copy, Debug)]
pub struct WorkerConfig {
    /// Only one replica should run the settlement passes.
    pub enabled: bool,
    pub expiry_interval: Duration,
    pub rollup_interval: Duration,
    /// Promo code expiry and payout reconciliation.
    pub housekeeping_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expiry_interval: DEFAULT_EXPIRY_INTERVAL,
            rollup_interval: Duration::from_secs(DEFAULT_ROLLUP_INTERVAL_HOURS * 3600),
            housekeeping_interval: DEFAULT_HOUSEKEEPING_INTERVAL,
        }
    }
}

impl WorkerConfig {
    pub fn from_env_or_default() -> Self {
        let hours = env_or_default("DLV_ROLLUP_INTERVAL_HOURS", DEFAULT_ROLLUP_INTERVAL_HOURS).max(1);
        let enabled = parse_boolean_flag(env::var("DLV_RUN_WORKERS").ok(), true);
        Self { enabled, rollup_interval: Duration::from_secs(hours * 3600), ..Default::default() }
    }
}

//-------------------------------------------------  AuthConfig  -------------------------------------------------------
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// The HS256 secret that signs and verifies access tokens.
    pub jwt_secret: Secret<String>,
    pub token_lifetime: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        let mut tmpfile = NamedTempFile::new().ok().and_then(|f| f.keep().ok());
        warn!(
            "🚨️🚨️🚨️ The JWT secret has not been set. I'm using a random value for this session. DO NOT operate on \
             production like this since every issued token becomes invalid on restart. 🚨️🚨️🚨️"
        );
        let secret = thread_rng().sample_iter(&Alphanumeric).take(48).map(char::from).collect::<String>();
        match &mut tmpfile {
            Some((f, p)) => {
                let key_data = json!({ "jwt_secret": secret }).to_string();
                match writeln!(f, "{key_data}") {
                    Ok(()) => warn!(
                        "🚨️🚨️🚨️ The JWT secret for this session was written to {}. If this is a production instance, \
                         you are doing it wrong! Set the DLV_JWT_SECRET environment variable instead. 🚨️🚨️🚨️",
                        p.to_str().unwrap_or("???")
                    ),
                    Err(e) => warn!("🪛️ Could not write the JWT secret to the temporary file. {e}"),
                }
            },
            None => {
                warn!("🪛️ Could not create a temporary file to store the JWT secret. ");
            },
        }
        Self { jwt_secret: Secret::new(secret), token_lifetime: DEFAULT_TOKEN_LIFETIME }
    }
}

impl AuthConfig {
    pub fn new<S: Into<String>>(secret: S) -> Self {
        Self { jwt_secret: Secret::new(secret.into()), token_lifetime: DEFAULT_TOKEN_LIFETIME }
    }

    pub fn try_from_env() -> Result<Self, ServerError> {
        let secret = env::var("DLV_JWT_SECRET")
            .map_err(|e| ServerError::ConfigurationError(format!("{e} [DLV_JWT_SECRET]")))?;
        if secret.trim().len() < 16 {
            return Err(ServerError::ConfigurationError(
                "DLV_JWT_SECRET must be at least 16 characters long".to_string(),
            ));
        }
        Ok(Self::new(secret))
    }
}
