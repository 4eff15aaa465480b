//! Server configuration
//!
//! Everything is read from `ESG_*` environment variables once, at start-up. Invalid values are logged and replaced with
//! their defaults, so the server always starts. See `cli-help.txt` for the full list.
use std::{collections::HashMap, env, net::IpAddr, time::Duration};

use escrow_common::{parse_boolean_flag, Secret};
use escrow_engine::{
    fees::CommissionRate,
    EscrowPolicy,
    DEFAULT_AUTO_RELEASE_BATCH_SIZE,
    DEFAULT_COMMISSION_BPS,
    DEFAULT_HOLD_PERIOD_DAYS,
    MAX_AUTO_RELEASE_BATCH_SIZE,
    SQLITE_BUSY_TIMEOUT,
};
use log::*;
use settlement_clients::ClientConfig;

use crate::auth::ActorRole;

const DEFAULT_ESG_HOST: &str = "127.0.0.1";
const DEFAULT_ESG_PORT: u16 = 8470;
const DEFAULT_AUTO_RELEASE_INTERVAL: Duration = Duration::from_secs(3600);
const DEFAULT_EXTERNAL_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Commission rates and hold period applied to new escrows.
    pub policy: EscrowPolicy,
    pub auto_release: AutoReleaseConfig,
    /// The time allowed for each call to the payment gateway or the seller balance ledger.
    pub external_call_timeout: Duration,
    pub webhooks: WebhookConfig,
    /// If true, the X-Forwarded-For header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_x_forwarded_for: bool,
    /// If true, the Forwarded header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_forwarded: bool,
    pub actor_roles: HashMap<String, ActorRole>,
    pub payment_gateway: ClientConfig,
    pub balance_ledger: ClientConfig,
    /// Escrow events are only forwarded when a notification service is configured.
    pub notifications: Option<ClientConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_ESG_HOST.into(),
            port: DEFAULT_ESG_PORT,
            database_url: String::default(),
            policy: EscrowPolicy::default(),
            auto_release: AutoReleaseConfig::default(),
            external_call_timeout: DEFAULT_EXTERNAL_CALL_TIMEOUT,
            webhooks: WebhookConfig::default(),
            use_x_forwarded_for: false,
            use_forwarded: false,
            actor_roles: HashMap::new(),
            payment_gateway: ClientConfig::default(),
            balance_ledger: ClientConfig::default(),
            notifications: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AutoReleaseConfig {
    /// How often the auto-release sweep runs.
    pub interval: Duration,
    /// The most escrows released by one sweep.
    pub batch_size: i64,
}

impl Default for AutoReleaseConfig {
    fn default() -> Self {
        Self { interval: DEFAULT_AUTO_RELEASE_INTERVAL, batch_size: DEFAULT_AUTO_RELEASE_BATCH_SIZE }
    }
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub hmac_secret: Secret<String>,
    /// If false, webhook signatures are not checked. **DANGER**
    pub hmac_checks: bool,
    /// When set, webhooks are only accepted from these addresses.
    pub whitelist: Option<Vec<IpAddr>>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self { hmac_secret: Secret::default(), hmac_checks: true, whitelist: None }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("ESG_HOST").ok().unwrap_or_else(|| DEFAULT_ESG_HOST.into());
        let port = env::var("ESG_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for ESG_PORT. {e} Using the default, {DEFAULT_ESG_PORT}, instead."
                    );
                    DEFAULT_ESG_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_ESG_PORT);
        let database_url = env::var("ESG_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ ESG_DATABASE_URL is not set. Please set it to the URL for the escrow database.");
            String::default()
        });
        let policy = policy_from_env();
        let auto_release = AutoReleaseConfig {
            interval: env_number("ESG_AUTO_RELEASE_INTERVAL_SECS", DEFAULT_AUTO_RELEASE_INTERVAL.as_secs())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_AUTO_RELEASE_INTERVAL),
            batch_size: env_number("ESG_AUTO_RELEASE_BATCH_SIZE", DEFAULT_AUTO_RELEASE_BATCH_SIZE as u64)
                .and_then(|n| i64::try_from(n).ok())
                .map(checked_batch_size)
                .unwrap_or(DEFAULT_AUTO_RELEASE_BATCH_SIZE),
        };
        let external_call_timeout =
            env_number("ESG_EXTERNAL_CALL_TIMEOUT_SECS", DEFAULT_EXTERNAL_CALL_TIMEOUT.as_secs())
                .map(Duration::from_secs)
                .map(checked_call_timeout)
                .unwrap_or(DEFAULT_EXTERNAL_CALL_TIMEOUT);
        let webhooks = WebhookConfig::from_env_or_default();
        let use_x_forwarded_for = parse_boolean_flag(env::var("ESG_USE_X_FORWARDED_FOR").ok(), false);
        let use_forwarded = parse_boolean_flag(env::var("ESG_USE_FORWARDED").ok(), false);
        let actor_roles = env::var("ESG_ACTOR_ROLES").map(|s| parse_actor_roles(&s)).unwrap_or_else(|_| {
            warn!("🪛️ ESG_ACTOR_ROLES is not set. No one will be able to perform administrative actions.");
            HashMap::new()
        });
        let payment_gateway = ClientConfig::payment_gateway_from_env_or_default();
        let balance_ledger = ClientConfig::balance_ledger_from_env_or_default();
        let notifications = ClientConfig::notifications_from_env();
        if notifications.is_none() {
            info!("🪛️ ESG_NOTIFICATION_URL is not set. Escrow events will not be forwarded.");
        }
        Self {
            host,
            port,
            database_url,
            policy,
            auto_release,
            external_call_timeout,
            webhooks,
            use_x_forwarded_for,
            use_forwarded,
            actor_roles,
            payment_gateway,
            balance_ledger,
            notifications,
        }
    }
}

impl WebhookConfig {
    pub fn from_env_or_default() -> Self {
        let hmac_secret = env::var("ESG_WEBHOOK_HMAC_SECRET").ok().unwrap_or_else(|| {
            error!("🪛️ ESG_WEBHOOK_HMAC_SECRET is not set. Please set it to the key the checkout signs webhooks with.");
            String::default()
        });
        let hmac_secret = Secret::new(hmac_secret);
        let hmac_checks = parse_boolean_flag(env::var("ESG_WEBHOOK_HMAC_CHECKS").ok(), true);
        if !hmac_checks {
            warn!("🚨️ Webhook HMAC checks are disabled. Anyone who can reach the server can create escrows.");
        }
        let whitelist = env::var("ESG_WEBHOOK_IP_WHITELIST").ok().and_then(|s| parse_ip_whitelist(&s));
        match &whitelist {
            Some(whitelist) if whitelist.is_empty() => {
                warn!(
                    "🚨️ The webhook IP whitelist was configured, but is empty.  The server will run, but won't \
                     accept any webhook calls."
                );
            },
            None => {
                info!("🪛️ No webhook IP whitelist is set. Only HMAC validation will be used.");
            },
            Some(v) => {
                let addrs = v.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ");
                info!("🪛️ Webhook IP whitelist: {addrs}");
            },
        }
        Self { hmac_secret, hmac_checks, whitelist }
    }
}

fn policy_from_env() -> EscrowPolicy {
    let default_bps = env_number("ESG_DEFAULT_COMMISSION_BPS", u64::from(DEFAULT_COMMISSION_BPS))
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(DEFAULT_COMMISSION_BPS);
    let default_commission = CommissionRate::from_bps(default_bps).unwrap_or_else(|e| {
        warn!("🪛️ Invalid ESG_DEFAULT_COMMISSION_BPS. {e} Using {DEFAULT_COMMISSION_BPS} bps instead.");
        CommissionRate::clamped(DEFAULT_COMMISSION_BPS)
    });
    let hold_period_days = env_number("ESG_HOLD_PERIOD_DAYS", u64::from(DEFAULT_HOLD_PERIOD_DAYS))
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(DEFAULT_HOLD_PERIOD_DAYS);
    let mut policy = EscrowPolicy::new(default_commission, hold_period_days);
    if let Ok(s) = env::var("ESG_STORE_COMMISSION_BPS") {
        for (store, rate) in parse_store_commissions(&s) {
            policy = policy.with_store_commission(store, rate);
        }
    }
    info!(
        "🪛️ Escrow policy: {} default commission, {} store override(s), {} day hold period",
        policy.default_commission,
        policy.store_commissions.len(),
        policy.hold_period_days
    );
    policy
}

/// Calls to the gateway and balance ledger must give up before a database writer would. Longer timeouts are replaced
/// with the default.
pub fn checked_call_timeout(timeout: Duration) -> Duration {
    if timeout.is_zero() || timeout >= SQLITE_BUSY_TIMEOUT {
        warn!(
            "🪛️ ESG_EXTERNAL_CALL_TIMEOUT_SECS must be between 1 and {} seconds, not {}. Using {} seconds instead.",
            SQLITE_BUSY_TIMEOUT.as_secs() - 1,
            timeout.as_secs(),
            DEFAULT_EXTERNAL_CALL_TIMEOUT.as_secs()
        );
        return DEFAULT_EXTERNAL_CALL_TIMEOUT;
    }
    timeout
}

pub fn checked_batch_size(batch_size: i64) -> i64 {
    if batch_size <= 0 || batch_size > MAX_AUTO_RELEASE_BATCH_SIZE {
        warn!(
            "🪛️ ESG_AUTO_RELEASE_BATCH_SIZE must be between 1 and {MAX_AUTO_RELEASE_BATCH_SIZE}, not {batch_size}. \
             Using {DEFAULT_AUTO_RELEASE_BATCH_SIZE} instead."
        );
        return DEFAULT_AUTO_RELEASE_BATCH_SIZE;
    }
    batch_size
}

/// Reads a non-negative integer setting. Returns `None`, after logging why, if the value is set but invalid.
fn env_number(name: &str, default: u64) -> Option<u64> {
    match env::var(name) {
        Ok(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|e| warn!("🪛️ Invalid configuration value for {name}: {s}. {e} Using {default} instead."))
            .ok(),
        Err(_) => {
            debug!("🪛️ {name} is not set. Using the default value of {default}.");
            Some(default)
        },
    }
}

/// Parses `store:bps` pairs, e.g. `store-a:800,store-b:1200`. Invalid entries are logged and skipped.
pub fn parse_store_commissions(s: &str) -> Vec<(String, CommissionRate)> {
    s.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let (store, bps) = entry.split_once(':').or_else(|| {
                warn!("🪛️ Ignoring store commission '{entry}'. Expected store:bps");
                None
            })?;
            let rate = bps
                .trim()
                .parse::<u32>()
                .map_err(|e| e.to_string())
                .and_then(|bps| CommissionRate::from_bps(bps).map_err(|e| e.to_string()))
                .map_err(|e| warn!("🪛️ Ignoring store commission '{entry}'. {e}"))
                .ok()?;
            Some((store.trim().to_string(), rate))
        })
        .collect()
}

/// Parses `actor=role` pairs, e.g. `alice=admin,bob=viewer`. Invalid entries are logged and skipped.
pub fn parse_actor_roles(s: &str) -> HashMap<String, ActorRole> {
    s.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let (actor, role) = entry.split_once('=').or_else(|| {
                warn!("🪛️ Ignoring actor role '{entry}'. Expected actor=role");
                None
            })?;
            let role = role.parse::<ActorRole>().map_err(|e| warn!("🪛️ Ignoring actor role '{entry}'. {e}")).ok()?;
            Some((actor.trim().to_string(), role))
        })
        .collect()
}

/// Parses a comma-separated list of IP addresses. `none`, `false` or `0` switch the whitelist off.
pub fn parse_ip_whitelist(s: &str) -> Option<Vec<IpAddr>> {
    if ["none", "false", "0"].contains(&s.trim().to_lowercase().as_str()) {
        info!(
            "🪛️ Webhook IP whitelist is disabled. If this is not what you want, set ESG_WEBHOOK_IP_WHITELIST to a \
             comma-separated list of IP addresses to enable it."
        );
        return None;
    }
    let ip_addrs = s
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| {
            s.parse()
                .map_err(|e| {
                    warn!("🪛️ Ignoring invalid IP address ({s}) in ESG_WEBHOOK_IP_WHITELIST: {e}");
                })
                .ok()
        })
        .collect::<Vec<IpAddr>>();
    Some(ip_addrs)
}
