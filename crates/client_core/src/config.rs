use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::{anyhow, bail, Context};
use shared::domain::Address;
use tracing::warn;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "ballot.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub rpc_url: String,
    pub ws_url: Option<String>,
    pub contract_address: Option<String>,
    pub account: Option<String>,
    pub request_timeout: Duration,
    pub receipt_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub tick_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".into(),
            ws_url: None,
            contract_address: None,
            account: None,
            request_timeout: Duration::from_secs(10),
            receipt_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_secs(1),
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl Settings {
    pub fn contract_address(&self) -> anyhow::Result<Address> {
        let raw = self
            .contract_address
            .as_deref()
            .ok_or_else(|| anyhow!("no contract address configured (set BALLOT_CONTRACT_ADDRESS)"))?;
        Address::parse(raw).with_context(|| format!("invalid contract address '{raw}'"))
    }

    pub fn rpc_endpoint(&self) -> anyhow::Result<Url> {
        let url = Url::parse(&self.rpc_url)
            .with_context(|| format!("invalid rpc url '{}'", self.rpc_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("rpc url must start with http:// or https://: {url}");
        }
        Ok(url)
    }

    /// The websocket endpoint for log subscriptions: `ws_url` when set,
    /// otherwise the rpc url with its scheme swapped.
    pub fn ws_endpoint(&self) -> anyhow::Result<Url> {
        let mut url = match &self.ws_url {
            Some(raw) => Url::parse(raw).with_context(|| format!("invalid websocket url '{raw}'"))?,
            None => self.rpc_endpoint()?,
        };
        let scheme = match url.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => bail!("unsupported websocket scheme '{other}'"),
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("cannot use scheme {scheme} for {url}"))?;
        Ok(url)
    }

    /// The sending identity, if one is configured.
    pub fn account(&self) -> anyhow::Result<Option<Address>> {
        self.account
            .as_deref()
            .map(|raw| Address::parse(raw).with_context(|| format!("invalid account '{raw}'")))
            .transpose()
    }

    pub fn apply_file_overrides(&mut self, raw: &str) -> anyhow::Result<()> {
        let file_cfg: HashMap<String, String> =
            toml::from_str(raw).context("config file is not a flat table of strings")?;
        self.apply(|key| file_cfg.get(key).cloned(), |key| key.to_string());
        Ok(())
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.apply(lookup, |key| format!("BALLOT_{}", key.to_ascii_uppercase()));
    }

    fn apply(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
        key_for: impl Fn(&str) -> String,
    ) {
        let get = |key: &str| lookup(&key_for(key)).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("rpc_url") {
            self.rpc_url = v;
        }
        if let Some(v) = get("ws_url") {
            self.ws_url = Some(v);
        }
        if let Some(v) = get("contract_address") {
            self.contract_address = Some(v);
        }
        if let Some(v) = get("account") {
            self.account = Some(v);
        }
        if let Some(v) = get("request_timeout_ms") {
            set_duration(&mut self.request_timeout, "request_timeout_ms", &v, Duration::from_millis);
        }
        if let Some(v) = get("receipt_timeout_secs") {
            set_duration(&mut self.receipt_timeout, "receipt_timeout_secs", &v, Duration::from_secs);
        }
        if let Some(v) = get("receipt_poll_ms") {
            set_duration(&mut self.receipt_poll_interval, "receipt_poll_ms", &v, Duration::from_millis);
        }
        if let Some(v) = get("tick_interval_ms") {
            set_duration(&mut self.tick_interval, "tick_interval_ms", &v, Duration::from_millis);
        }
    }
}

fn set_duration(target: &mut Duration, key: &str, raw: &str, unit: fn(u64) -> Duration) {
    match raw.trim().parse::<u64>() {
        Ok(parsed) if parsed > 0 => *target = unit(parsed),
        _ => warn!(key, value = raw, "config: ignoring invalid duration"),
    }
}

/// Defaults, then `ballot.toml` in the working directory, then `BALLOT_*`
/// environment variables.
pub fn load_settings() -> Settings {
    load_settings_from(Path::new(DEFAULT_CONFIG_FILE))
}

pub fn load_settings_from(path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        if let Err(err) = settings.apply_file_overrides(&raw) {
            warn!(path = %path.display(), "config: ignoring config file: {err:#}");
        }
    }

    settings.apply_env_overrides(|key| std::env::var(key).ok());
    settings
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
