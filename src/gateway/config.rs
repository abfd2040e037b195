//! Gateway configuration
//!
//! Typed per-store gateway settings, the pure validators shared by the admin
//! save path and the callback reconciler, and the provider that hands a
//! `GatewayConfig` to callers by store id.

use config::{Config, Environment as EnvSource, File};
use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use url::Url;

use crate::gateway::error::{GatewayError, GatewayResult};

pub const DEFAULT_GATEWAY_URL: &str = "http://localhost:5000";
pub const DEFAULT_TITLE: &str = "Somnia Payment Gateway";
pub const DEFAULT_PAYMENT_TIMEOUT_MINUTES: u32 = 30;
pub const MIN_PAYMENT_TIMEOUT_MINUTES: u32 = 5;
pub const MAX_PAYMENT_TIMEOUT_MINUTES: u32 = 120;

pub type StoreId = u32;

pub const DEFAULT_STORE_ID: StoreId = 1;

/// Deployment mode, injected at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Environment {
    pub is_production: bool,
}

impl Environment {
    pub fn production() -> Self {
        Self {
            is_production: true,
        }
    }

    pub fn development() -> Self {
        Self {
            is_production: false,
        }
    }

    pub fn from_name(name: &str) -> Self {
        Self {
            is_production: matches!(name.trim().to_lowercase().as_str(), "production" | "prod"),
        }
    }
}

// ---------------------------------------------------------------------------
// IP allowlist
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum AllowedIp {
    Exact(IpAddr),
    Range(IpNet),
}

impl AllowedIp {
    fn matches(&self, ip: IpAddr) -> bool {
        match self {
            AllowedIp::Exact(allowed) => allowed.to_canonical() == ip,
            AllowedIp::Range(net) => net.contains(&ip),
        }
    }
}

/// `::ffff:a.b.c.d/n` with n >= 96 becomes `a.b.c.d/(n - 96)`, matching the
/// canonicalized caller address.
fn canonical_net(net: IpNet) -> IpNet {
    match net {
        IpNet::V6(v6) if v6.prefix_len() >= 96 => match v6.network().to_ipv4_mapped() {
            Some(v4) => Ipv4Net::new(v4, v6.prefix_len() - 96)
                .map(IpNet::V4)
                .unwrap_or(net),
            None => net,
        },
        _ => net,
    }
}

impl fmt::Display for AllowedIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllowedIp::Exact(ip) => write!(f, "{}", ip),
            AllowedIp::Range(net) => write!(f, "{}", net),
        }
    }
}

/// Literal addresses and CIDR ranges allowed to deliver callbacks.
/// An empty list allows every address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpAllowlist {
    entries: Vec<AllowedIp>,
}

impl IpAllowlist {
    /// Parse a newline and/or comma separated list.
    pub fn parse(raw: &str) -> GatewayResult<Self> {
        Self::from_entries(raw.split(|c| c == ',' || c == '\n' || c == '\r'))
    }

    pub fn from_entries<I, S>(entries: I) -> GatewayResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Vec::new();
        let mut invalid = Vec::new();

        for entry in entries {
            let value = entry.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            if value.contains('/') {
                match IpNet::from_str(value) {
                    Ok(net) => parsed.push(AllowedIp::Range(canonical_net(net))),
                    Err(_) => invalid.push(value.to_string()),
                }
            } else {
                match IpAddr::from_str(value) {
                    Ok(ip) => parsed.push(AllowedIp::Exact(ip)),
                    Err(_) => invalid.push(value.to_string()),
                }
            }
        }

        if !invalid.is_empty() {
            return Err(GatewayError::validation(
                format!("invalid IP allowlist entries: {}", invalid.join(", ")),
                "allowed_ips",
            ));
        }

        Ok(Self { entries: parsed })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        let ip = ip.to_canonical();
        self.entries.iter().any(|entry| entry.matches(ip))
    }
}

impl Serialize for IpAllowlist {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter().map(|entry| entry.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Pure validators
// ---------------------------------------------------------------------------

/// Strip trailing slashes and require an http(s) URL with a host.
pub fn validate_gateway_url(raw: &str) -> GatewayResult<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(GatewayError::validation(
            "gateway URL cannot be empty",
            "gateway_url",
        ));
    }

    let parsed = Url::parse(trimmed).map_err(|e| {
        GatewayError::validation(format!("gateway URL is not valid: {}", e), "gateway_url")
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(GatewayError::validation(
            "gateway URL must use http or https",
            "gateway_url",
        ));
    }

    if parsed.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(GatewayError::validation(
            "gateway URL must include a host",
            "gateway_url",
        ));
    }

    Ok(trimmed.to_string())
}

pub fn validate_merchant_id(raw: &str) -> GatewayResult<u64> {
    match raw.trim().parse::<u64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(GatewayError::validation(
            "merchant ID must be a positive integer",
            "merchant_id",
        )),
    }
}

/// Clamp to the supported payment window.
pub fn validate_payment_timeout(minutes: i64) -> u32 {
    minutes.clamp(
        MIN_PAYMENT_TIMEOUT_MINUTES as i64,
        MAX_PAYMENT_TIMEOUT_MINUTES as i64,
    ) as u32
}

/// Unparsable addresses are rejected unless the allowlist is empty.
pub fn is_ip_allowed(ip: &str, allowlist: &IpAllowlist) -> bool {
    if allowlist.is_empty() {
        return true;
    }
    match IpAddr::from_str(ip.trim()) {
        Ok(addr) => allowlist.allows(addr),
        Err(_) => false,
    }
}

pub fn is_localhost_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") || host.to_lowercase().ends_with(".localhost") {
        return true;
    }
    match IpAddr::from_str(host) {
        Ok(ip) => ip.to_canonical().is_loopback(),
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Typed configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayConfig {
    pub active: bool,
    pub title: String,
    pub gateway_url: Option<String>,
    pub merchant_id: Option<u64>,
    pub payment_timeout_minutes: u32,
    pub allowed_ips: IpAllowlist,
    pub debug_mode: bool,
    pub require_amount_for_paid: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            active: true,
            title: DEFAULT_TITLE.to_string(),
            gateway_url: Some(DEFAULT_GATEWAY_URL.to_string()),
            merchant_id: None,
            payment_timeout_minutes: DEFAULT_PAYMENT_TIMEOUT_MINUTES,
            allowed_ips: IpAllowlist::default(),
            debug_mode: false,
            require_amount_for_paid: true,
        }
    }
}

impl GatewayConfig {
    fn parsed_url(&self) -> Option<Url> {
        self.gateway_url.as_deref().and_then(|u| Url::parse(u).ok())
    }

    pub fn is_secure_connection(&self) -> bool {
        self.parsed_url()
            .map(|u| u.scheme() == "https")
            .unwrap_or(false)
    }

    pub fn is_localhost_gateway(&self) -> bool {
        self.parsed_url()
            .and_then(|u| u.host_str().map(is_localhost_host))
            .unwrap_or(false)
    }

    pub fn should_enforce_https(&self, environment: Environment) -> bool {
        environment.is_production && !self.is_localhost_gateway()
    }

    pub fn is_ip_allowed(&self, ip: &str) -> bool {
        is_ip_allowed(ip, &self.allowed_ips)
    }
}

// ---------------------------------------------------------------------------
// Raw settings (config files, environment, admin form)
// ---------------------------------------------------------------------------

/// A scalar as it arrives from a config source or a JSON form.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

impl SettingValue {
    fn as_text(&self) -> String {
        match self {
            SettingValue::Bool(b) => b.to_string(),
            SettingValue::Int(i) => i.to_string(),
            SettingValue::Float(f) => f.to_string(),
            SettingValue::Text(s) => s.clone(),
            SettingValue::List(items) => items.join("\n"),
        }
    }

    fn as_bool(&self, field: &str) -> GatewayResult<bool> {
        match self {
            SettingValue::Bool(b) => Ok(*b),
            SettingValue::Int(i) => Ok(*i != 0),
            SettingValue::Text(s) => match s.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" | "" => Ok(false),
                _ => Err(GatewayError::validation(
                    format!("'{}' is not a boolean", s),
                    field,
                )),
            },
            _ => Err(GatewayError::validation("expected a boolean", field)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GatewaySettings {
    pub active: Option<SettingValue>,
    pub title: Option<SettingValue>,
    #[serde(alias = "gateway_url")]
    pub url: Option<SettingValue>,
    pub merchant_id: Option<SettingValue>,
    pub payment_timeout: Option<SettingValue>,
    pub allowed_ips: Option<SettingValue>,
    pub debug: Option<SettingValue>,
    pub require_amount: Option<SettingValue>,
    /// Per-store overrides keyed by store id.
    #[serde(default, skip_serializing)]
    pub stores: BTreeMap<String, GatewaySettings>,
}

impl GatewaySettings {
    /// Load from `config/gateway.*` (optional) then `GATEWAY_*` variables.
    pub fn load(path: Option<&str>) -> GatewayResult<Self> {
        let config = Config::builder()
            .add_source(File::with_name(path.unwrap_or("config/gateway")).required(false))
            .add_source(
                EnvSource::with_prefix("GATEWAY")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| {
                GatewayError::configuration(format!("failed to read gateway settings: {}", e))
            })?;

        config.try_deserialize::<GatewaySettings>().map_err(|e| {
            GatewayError::configuration(format!("failed to decode gateway settings: {}", e))
        })
    }

    /// Fields set here win; unset fields inherit from `base`.
    pub fn overlay(&self, base: &GatewaySettings) -> GatewaySettings {
        GatewaySettings {
            active: self.active.clone().or_else(|| base.active.clone()),
            title: self.title.clone().or_else(|| base.title.clone()),
            url: self.url.clone().or_else(|| base.url.clone()),
            merchant_id: self.merchant_id.clone().or_else(|| base.merchant_id.clone()),
            payment_timeout: self
                .payment_timeout
                .clone()
                .or_else(|| base.payment_timeout.clone()),
            allowed_ips: self.allowed_ips.clone().or_else(|| base.allowed_ips.clone()),
            debug: self.debug.clone().or_else(|| base.debug.clone()),
            require_amount: self
                .require_amount
                .clone()
                .or_else(|| base.require_amount.clone()),
            stores: BTreeMap::new(),
        }
    }

    /// Run every validator, collecting all field errors.
    pub fn normalize(&self) -> Result<GatewayConfig, Vec<GatewayError>> {
        let defaults = GatewayConfig::default();
        let mut errors = Vec::new();

        let active = match &self.active {
            Some(v) => v.as_bool("active").unwrap_or_else(|e| {
                errors.push(e);
                defaults.active
            }),
            None => defaults.active,
        };

        let title = self
            .title
            .as_ref()
            .map(|v| v.as_text().trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or(defaults.title);

        let gateway_url = match &self.url {
            None => defaults.gateway_url,
            Some(v) => {
                let raw = v.as_text();
                if raw.trim().is_empty() {
                    None
                } else {
                    match validate_gateway_url(&raw) {
                        Ok(url) => Some(url),
                        Err(e) => {
                            errors.push(e);
                            None
                        }
                    }
                }
            }
        };

        let merchant_id = match &self.merchant_id {
            None => None,
            Some(v) => {
                let raw = v.as_text();
                if raw.trim().is_empty() {
                    None
                } else {
                    match validate_merchant_id(&raw) {
                        Ok(id) => Some(id),
                        Err(e) => {
                            errors.push(e);
                            None
                        }
                    }
                }
            }
        };

        let payment_timeout_minutes = match &self.payment_timeout {
            None => defaults.payment_timeout_minutes,
            Some(v) => match v.as_text().trim().parse::<i64>() {
                Ok(minutes) => validate_payment_timeout(minutes),
                Err(_) => {
                    errors.push(GatewayError::validation(
                        "payment timeout must be a whole number of minutes",
                        "payment_timeout",
                    ));
                    defaults.payment_timeout_minutes
                }
            },
        };

        let allowed_ips = match &self.allowed_ips {
            None => IpAllowlist::default(),
            Some(SettingValue::List(items)) => IpAllowlist::from_entries(items).unwrap_or_else(|e| {
                errors.push(e);
                IpAllowlist::default()
            }),
            Some(v) => IpAllowlist::parse(&v.as_text()).unwrap_or_else(|e| {
                errors.push(e);
                IpAllowlist::default()
            }),
        };

        let debug_mode = match &self.debug {
            Some(v) => v.as_bool("debug").unwrap_or_else(|e| {
                errors.push(e);
                false
            }),
            None => defaults.debug_mode,
        };

        let require_amount_for_paid = match &self.require_amount {
            Some(v) => v.as_bool("require_amount").unwrap_or_else(|e| {
                errors.push(e);
                true
            }),
            None => defaults.require_amount_for_paid,
        };

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(GatewayConfig {
            active,
            title,
            gateway_url,
            merchant_id,
            payment_timeout_minutes,
            allowed_ips,
            debug_mode,
            require_amount_for_paid,
        })
    }
}

fn join_errors(errors: Vec<GatewayError>) -> GatewayError {
    GatewayError::configuration(
        errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; "),
    )
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Read-only source of gateway configuration, scoped by store.
pub trait GatewayConfigProvider: Send + Sync {
    fn gateway_config(&self, store_id: StoreId) -> GatewayResult<GatewayConfig>;

    fn environment(&self) -> Environment;

    fn should_enforce_https(&self, store_id: StoreId) -> GatewayResult<bool> {
        let config = self.gateway_config(store_id)?;
        Ok(config.should_enforce_https(self.environment()))
    }
}

#[derive(Debug, Clone)]
pub struct StaticConfigProvider {
    environment: Environment,
    default: GatewayConfig,
    stores: HashMap<StoreId, GatewayConfig>,
}

impl StaticConfigProvider {
    pub fn new(environment: Environment, default: GatewayConfig) -> Self {
        Self {
            environment,
            default,
            stores: HashMap::new(),
        }
    }

    pub fn with_store(mut self, store_id: StoreId, config: GatewayConfig) -> Self {
        self.stores.insert(store_id, config);
        self
    }

    pub fn from_settings(settings: &GatewaySettings, environment: Environment) -> GatewayResult<Self> {
        let default = settings.normalize().map_err(join_errors)?;
        let mut provider = Self::new(environment, default);

        for (key, overrides) in &settings.stores {
            let store_id = key.trim().parse::<StoreId>().map_err(|_| {
                GatewayError::configuration(format!("store key '{}' is not a numeric id", key))
            })?;
            let config = overrides
                .overlay(settings)
                .normalize()
                .map_err(join_errors)?;
            provider.stores.insert(store_id, config);
        }

        Ok(provider)
    }

    pub fn store_ids(&self) -> Vec<StoreId> {
        let mut ids: Vec<StoreId> = self.stores.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl GatewayConfigProvider for StaticConfigProvider {
    fn gateway_config(&self, store_id: StoreId) -> GatewayResult<GatewayConfig> {
        Ok(self
            .stores
            .get(&store_id)
            .cloned()
            .unwrap_or_else(|| self.default.clone()))
    }

    fn environment(&self) -> Environment {
        self.environment
    }
}
