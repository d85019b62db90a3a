//! Structured configuration and environment-sourced secrets.
//!
//! Files under the config directory hold tuning knobs only; credentials come
//! exclusively from environment variables and are never written back out.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::Venue;
use crate::paths::PathRegistry;

fn env_flag(var: &str, default: bool) -> bool {
    std::env::var(var)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

/// Global knobs (`settings.toml`, env overrides on top).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// None means "computed from system resources".
    pub max_concurrent_scrapers: Option<usize>,
    /// Wall-clock budget for one adapter run.
    pub scraper_timeout_secs: u64,
    pub use_proxy: bool,
    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
    pub cache_max_items: usize,
    pub max_connections: usize,
    pub max_connections_per_host: usize,
    pub min_profit_percentage: f64,
    pub min_price: f64,
    pub max_results: usize,
    pub log_level: String,
    pub proxy: ProxySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            max_concurrent_scrapers: None,
            scraper_timeout_secs: 300,
            use_proxy: true,
            cache_enabled: true,
            cache_ttl_secs: 300,
            cache_max_items: 4096,
            max_connections: 100,
            max_connections_per_host: 30,
            min_profit_percentage: 0.05,
            min_price: 0.50,
            max_results: 100,
            log_level: "info".to_string(),
            proxy: ProxySettings::default(),
        }
    }
}

impl Settings {
    /// Load from `settings.toml` when present, then apply env overrides.
    pub fn load(paths: &PathRegistry) -> Result<Self> {
        let mut settings = match std::fs::read_to_string(paths.settings_file()) {
            Ok(raw) => toml::from_str(&raw).context("malformed settings.toml")?,
            Err(_) => Settings::default(),
        };
        settings.apply_env();
        Ok(settings)
    }

    fn apply_env(&mut self) {
        self.use_proxy = env_flag("BOT_USE_PROXY", self.use_proxy);
        self.cache_enabled = env_flag("BOT_CACHE_ENABLED", self.cache_enabled);
        if let Ok(v) = std::env::var("BOT_LOG_LEVEL") {
            self.log_level = v;
        }
    }
}

/// Proxy subsystem settings: named pool seeds plus the egress-IP lookup used
/// for allow-list synchronization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub enabled: bool,
    pub ip_lookup_url: String,
    pub allowlist_url: String,
    pub pools: Vec<ProxyPoolSeed>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ip_lookup_url: "https://api.ipify.org".to_string(),
            allowlist_url: "https://api.oculusproxies.com/v1/configure/proxy/whitelistIp"
                .to_string(),
            pools: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyPoolSeed {
    pub name: String,
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub region: Option<String>,
}

/// Per-venue tuning. Venue-specific decisions live in this table, not in
/// adapter subclasses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    pub enabled: bool,
    pub use_proxy: bool,
    pub timeout_secs: u64,
    pub rate_per_minute: u32,
    pub burst: u32,
    pub requires_api_key: bool,
    /// Route requests through the low-level client; set for venues fronted
    /// by a WAF that fingerprints modern HTTP libraries.
    pub anti_bot_client: bool,
    /// SPA-rendered catalog that needs browser rendering; the framework
    /// short-circuits these to an empty snapshot.
    pub dynamic_content: bool,
    /// Source-currency → USD multiplier applied during normalization.
    pub currency_ratio: f64,
    pub page_size: u32,
    /// Consecutive empty pages tolerated before pagination stops.
    pub max_empty_pages: u32,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            use_proxy: true,
            timeout_secs: 30,
            rate_per_minute: 60,
            burst: 10,
            requires_api_key: false,
            anti_bot_client: false,
            dynamic_content: false,
            currency_ratio: 1.0,
            page_size: 100,
            max_empty_pages: 2,
        }
    }
}

impl ScraperConfig {
    /// Built-in per-venue defaults; `scrapers.toml` overrides on top.
    pub fn default_for(venue: Venue) -> Self {
        let mut cfg = Self::default();
        match venue {
            Venue::Waxpeer => {
                cfg.requires_api_key = true;
                // Whole-catalog JSON in one response.
                cfg.timeout_secs = 60;
            }
            Venue::Skinport => {
                cfg.timeout_secs = 60;
                cfg.rate_per_minute = 8;
                cfg.burst = 2;
            }
            Venue::Bitskins => {
                cfg.requires_api_key = true;
            }
            Venue::SteamMarket | Venue::SteamListing | Venue::SteamId => {
                cfg.use_proxy = true;
                cfg.rate_per_minute = 20;
                cfg.burst = 5;
                cfg.timeout_secs = 60;
            }
            Venue::Empire => {
                cfg.requires_api_key = true;
                // Empire coin → USD.
                cfg.currency_ratio = 0.614;
            }
            Venue::Shadowpay => {
                cfg.requires_api_key = true;
            }
            Venue::CsDeals => {}
            Venue::CsTrade => {
                cfg.anti_bot_client = true;
                cfg.timeout_secs = 60;
            }
            Venue::LisSkins => {
                // RUB catalog endpoint.
                cfg.currency_ratio = 0.011;
            }
            Venue::MarketCsgo => {
                cfg.currency_ratio = 0.011;
            }
            Venue::MannCoStore => {
                cfg.anti_bot_client = true;
            }
            Venue::TradeIt | Venue::RapidSkins | Venue::SkinDeck => {
                cfg.dynamic_content = true;
            }
            Venue::SkinOut => {}
            Venue::White => {}
        }
        cfg
    }
}

/// Partial override as parsed from `scrapers.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ScraperOverride {
    enabled: Option<bool>,
    use_proxy: Option<bool>,
    timeout_secs: Option<u64>,
    rate_per_minute: Option<u32>,
    burst: Option<u32>,
    requires_api_key: Option<bool>,
    anti_bot_client: Option<bool>,
    dynamic_content: Option<bool>,
    currency_ratio: Option<f64>,
    page_size: Option<u32>,
    max_empty_pages: Option<u32>,
}

impl ScraperOverride {
    fn apply(&self, cfg: &mut ScraperConfig) {
        macro_rules! take {
            ($field:ident) => {
                if let Some(v) = self.$field {
                    cfg.$field = v;
                }
            };
        }
        take!(enabled);
        take!(use_proxy);
        take!(timeout_secs);
        take!(rate_per_minute);
        take!(burst);
        take!(requires_api_key);
        take!(anti_bot_client);
        take!(dynamic_content);
        take!(currency_ratio);
        take!(page_size);
        take!(max_empty_pages);
    }
}

/// Named opportunity filter preset (`search_filters.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    pub min_profit_percentage: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub venues: Option<Vec<Venue>>,
    pub query: Option<String>,
}

/// Everything read from the config directory at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub settings: Settings,
    scrapers: HashMap<Venue, ScraperConfig>,
    filters: HashMap<String, SearchFilters>,
}

impl AppConfig {
    pub fn load(paths: &PathRegistry) -> Result<Self> {
        let settings = Settings::load(paths)?;

        let mut scrapers: HashMap<Venue, ScraperConfig> = Venue::ALL
            .iter()
            .map(|&v| (v, ScraperConfig::default_for(v)))
            .collect();
        if let Ok(raw) = std::fs::read_to_string(paths.scrapers_file()) {
            let overrides: HashMap<String, ScraperOverride> =
                toml::from_str(&raw).context("malformed scrapers.toml")?;
            for (name, entry) in &overrides {
                match Venue::parse(name) {
                    Some(venue) => entry.apply(scrapers.get_mut(&venue).expect("all venues seeded")),
                    None => warn!(venue = %name, "scrapers.toml names an unknown venue, ignoring"),
                }
            }
        }

        let mut filters = HashMap::new();
        if let Ok(raw) = std::fs::read_to_string(paths.search_filters_file()) {
            filters = toml::from_str(&raw).context("malformed search_filters.toml")?;
        }

        // api_keys.toml is documentation of which venues want keys; any
        // value found there is refused so secrets stay in the environment.
        if let Ok(raw) = std::fs::read_to_string(paths.api_keys_file()) {
            if let Ok(entries) = toml::from_str::<HashMap<String, String>>(&raw) {
                if entries.values().any(|v| !v.trim().is_empty()) {
                    warn!("api_keys.toml contains values; ignored, keys are read from <VENUE>_API_KEY env vars only");
                }
            }
        }

        Ok(Self {
            settings,
            scrapers,
            filters,
        })
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings,
            scrapers: Venue::ALL
                .iter()
                .map(|&v| (v, ScraperConfig::default_for(v)))
                .collect(),
            filters: HashMap::new(),
        }
    }

    pub fn scraper(&self, venue: Venue) -> &ScraperConfig {
        &self.scrapers[&venue]
    }

    pub fn scraper_mut(&mut self, venue: Venue) -> &mut ScraperConfig {
        self.scrapers.get_mut(&venue).expect("all venues seeded")
    }

    pub fn filter_preset(&self, name: &str) -> Option<&SearchFilters> {
        self.filters.get(name)
    }
}

/// Environment-sourced credentials. Never serialized, never logged.
pub struct Secrets {
    api_keys: HashMap<Venue, String>,
    oculus_auth_token: Option<String>,
    oculus_order_token: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        let mut api_keys = HashMap::new();
        for venue in Venue::ALL {
            if let Ok(key) = std::env::var(venue.api_key_var()) {
                if !key.trim().is_empty() {
                    api_keys.insert(venue, key);
                }
            }
        }
        Self {
            api_keys,
            oculus_auth_token: std::env::var("OCULUS_AUTH_TOKEN").ok().filter(|v| !v.is_empty()),
            oculus_order_token: std::env::var("OCULUS_ORDER_TOKEN").ok().filter(|v| !v.is_empty()),
        }
    }

    #[cfg(test)]
    pub fn empty() -> Self {
        Self {
            api_keys: HashMap::new(),
            oculus_auth_token: None,
            oculus_order_token: None,
        }
    }

    pub fn api_key(&self, venue: Venue) -> Option<&str> {
        self.api_keys.get(&venue).map(String::as_str)
    }

    pub fn oculus_auth_token(&self) -> Option<&str> {
        self.oculus_auth_token.as_deref()
    }

    pub fn oculus_order_token(&self) -> Option<&str> {
        self.oculus_order_token.as_deref()
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("api_keys", &format!("<{} redacted>", self.api_keys.len()))
            .field("oculus_auth_token", &self.oculus_auth_token.as_ref().map(|_| "<redacted>"))
            .field("oculus_order_token", &self.oculus_order_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_defaults_capture_special_cases() {
        assert!(ScraperConfig::default_for(Venue::Waxpeer).requires_api_key);
        assert!(ScraperConfig::default_for(Venue::CsTrade).anti_bot_client);
        assert!(ScraperConfig::default_for(Venue::TradeIt).dynamic_content);
        assert!(ScraperConfig::default_for(Venue::RapidSkins).dynamic_content);
        assert!((ScraperConfig::default_for(Venue::MarketCsgo).currency_ratio - 0.011).abs() < 1e-9);
        assert_eq!(ScraperConfig::default_for(Venue::Skinport).rate_per_minute, 8);
    }

    #[test]
    fn scraper_overrides_merge_onto_defaults() {
        let root = tempfile::tempdir().unwrap();
        let paths = PathRegistry::with_root(root.path());
        paths.ensure().unwrap();
        std::fs::write(
            paths.scrapers_file(),
            "[waxpeer]\nenabled = false\nrate_per_minute = 30\n\n[skinport]\ntimeout_secs = 90\n",
        )
        .unwrap();

        let config = AppConfig::load(&paths).unwrap();
        let waxpeer = config.scraper(Venue::Waxpeer);
        assert!(!waxpeer.enabled);
        assert_eq!(waxpeer.rate_per_minute, 30);
        // Untouched fields keep their built-in defaults.
        assert!(waxpeer.requires_api_key);
        assert_eq!(config.scraper(Venue::Skinport).timeout_secs, 90);
    }

    #[test]
    fn settings_env_overrides() {
        let root = tempfile::tempdir().unwrap();
        let paths = PathRegistry::with_root(root.path());
        paths.ensure().unwrap();

        std::env::set_var("BOT_USE_PROXY", "false");
        let settings = Settings::load(&paths).unwrap();
        std::env::remove_var("BOT_USE_PROXY");
        assert!(!settings.use_proxy);
    }

    #[test]
    fn secrets_read_from_env_and_stay_redacted() {
        std::env::set_var("WAXPEER_API_KEY", "wx-secret-123");
        let secrets = Secrets::from_env();
        std::env::remove_var("WAXPEER_API_KEY");

        assert_eq!(secrets.api_key(Venue::Waxpeer), Some("wx-secret-123"));
        assert_eq!(secrets.api_key(Venue::Empire), None);

        let debug = format!("{:?}", secrets);
        assert!(!debug.contains("wx-secret-123"));
    }

    #[test]
    fn filter_presets_parse() {
        let root = tempfile::tempdir().unwrap();
        let paths = PathRegistry::with_root(root.path());
        paths.ensure().unwrap();
        std::fs::write(
            paths.search_filters_file(),
            "[aggressive]\nmin_profit_percentage = 0.10\nmin_price = 1.0\n\n[knives]\nquery = \"Karambit\"\n",
        )
        .unwrap();

        let config = AppConfig::load(&paths).unwrap();
        let preset = config.filter_preset("aggressive").unwrap();
        assert_eq!(preset.min_profit_percentage, Some(0.10));
        assert_eq!(config.filter_preset("knives").unwrap().query.as_deref(), Some("Karambit"));
        assert!(config.filter_preset("missing").is_none());
    }
}
