use super::passphrase::{derive_psk, is_derived_key, is_valid_psk};
use crate::{
    config::AppConfig,
    error::NetworkError,
    system::{
        CommandExecutor, CommandLine, FileSystem, LinkController, ServiceController,
        execute_checked,
        parsers::{parse_connected_ssids, parse_scan_ssids},
    },
};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::fmt;

const FILE_MODE: u32 = 0o600;
const NETWORK_MARKER: &str = "network=";

/// One `network={...}` entry of `wpa_supplicant.conf`
#[derive(Clone, Default, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WpaNetwork {
    #[validate(min_length = 1)]
    pub ssid: String,
    #[serde(default)]
    pub scan_ssid: bool,
    /// Plaintext passphrase or 64 hex digit derived key
    #[validate(min_length = 8)]
    #[validate(max_length = 64)]
    pub psk: Option<String>,
    pub key_mgmt: Option<String>,
    pub proto: Option<String>,
    pub pairwise: Option<String>,
    pub auth_alg: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

impl WpaNetwork {
    pub fn new(ssid: impl Into<String>, psk: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            psk: Some(psk.into()),
            ..Default::default()
        }
    }
}

impl fmt::Debug for WpaNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WpaNetwork")
            .field("ssid", &self.ssid)
            .field("scan_ssid", &self.scan_ssid)
            .field("psk", &self.psk.as_ref().map(|_| "{suppressed}"))
            .field("key_mgmt", &self.key_mgmt)
            .field("proto", &self.proto)
            .field("pairwise", &self.pairwise)
            .field("auth_alg", &self.auth_alg)
            .field("disabled", &self.disabled)
            .finish()
    }
}

/// Global options and networks of `wpa_supplicant.conf`
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WpaConfig {
    pub ctrl_interface: String,
    pub ap_scan: Option<u8>,
    pub update_config: Option<u8>,
    pub country: Option<String>,
    /// File order, which is the order of preference
    pub networks: Vec<WpaNetwork>,
}

impl WpaConfig {
    /// Configuration written when there is no file yet
    pub fn with_defaults(config: &AppConfig) -> Self {
        Self {
            ctrl_interface: config.wifi.ctrl_interface.clone(),
            ap_scan: Some(1),
            update_config: Some(1),
            country: Some(config.wifi.country.clone()),
            networks: vec![],
        }
    }

    /// First network with `ssid`
    pub fn network(&self, ssid: &str) -> Option<&WpaNetwork> {
        self.networks.iter().find(|n| n.ssid == ssid)
    }

    /// Replace the first network with the same SSID, the new entry goes last
    pub fn upsert_network(&mut self, network: WpaNetwork) {
        if let Some(pos) = self.networks.iter().position(|n| n.ssid == network.ssid) {
            self.networks.remove(pos);
        }
        self.networks.push(network);
    }

    /// Returns `false` if there was no network with `ssid`
    pub fn remove_network(&mut self, ssid: &str) -> bool {
        match self.networks.iter().position(|n| n.ssid == ssid) {
            Some(pos) => {
                self.networks.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Checks `set_config` applies before anything is written
    pub fn validate_for_write(&self) -> Result<()> {
        let country = self
            .country
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| NetworkError::validation("country must be set"))?;

        if !is_country_code(country) {
            return Err(NetworkError::validation(format!(
                "country must be an ISO 3166 alpha-2 code, got '{country}'"
            ))
            .into());
        }

        for network in &self.networks {
            network
                .validate()
                .map_err(|e| NetworkError::validation(format!("network '{}': {e}", network.ssid)))?;

            if let Some(psk) = &network.psk
                && !is_valid_psk(psk)
            {
                return Err(NetworkError::validation(format!(
                    "network '{}': psk must be 8 to 63 printable ASCII characters or 64 hex digits",
                    network.ssid
                ))
                .into());
            }
        }

        Ok(())
    }
}

pub fn is_country_code(country: &str) -> bool {
    country.len() == 2 && country.chars().all(|c| c.is_ascii_uppercase())
}

/// Parse the content of `wpa_supplicant.conf`
pub fn parse_wpa_config(content: &str) -> WpaConfig {
    let mut sections = content.split(NETWORK_MARKER);
    let globals = sections.next().unwrap_or_default();

    let mut config = WpaConfig {
        ctrl_interface: String::new(),
        ap_scan: None,
        update_config: None,
        country: None,
        networks: vec![],
    };

    for (key, value) in key_values(globals) {
        match key {
            "ctrl_interface" => config.ctrl_interface = value.to_string(),
            "ap_scan" => config.ap_scan = value.parse().ok(),
            "update_config" => config.update_config = value.parse().ok(),
            "country" => config.country = Some(value.to_string()),
            _ => {}
        }
    }

    for section in sections {
        let body = section.split_once('}').map_or(section, |(body, _)| body);
        let mut network = WpaNetwork::default();

        for (key, value) in key_values(body) {
            match key {
                "ssid" => network.ssid = value.replace('"', ""),
                "scan_ssid" => network.scan_ssid = value == "1",
                "psk" => {
                    let plain = value
                        .strip_prefix('"')
                        .and_then(|v| v.strip_suffix('"'));
                    network.psk = Some(plain.unwrap_or(value).to_string());
                }
                "key_mgmt" => network.key_mgmt = Some(value.to_string()),
                "proto" => network.proto = Some(value.to_string()),
                "pairwise" => network.pairwise = Some(value.to_string()),
                "auth_alg" => network.auth_alg = Some(value.to_string()),
                "disabled" => network.disabled = value == "1",
                _ => {}
            }
        }

        config.networks.push(network);
    }

    config
}

/// Render `config` as `wpa_supplicant.conf`
///
/// Passphrases are expected to be derived already.
pub fn render_wpa_config(config: &WpaConfig) -> String {
    let mut out = format!("ctrl_interface={}\n", config.ctrl_interface);

    if let Some(ap_scan) = config.ap_scan {
        out.push_str(&format!("ap_scan={ap_scan}\n"));
    }
    if let Some(update_config) = config.update_config {
        out.push_str(&format!("update_config={update_config}\n"));
    }
    out.push_str(&format!(
        "country={}\n\n",
        config.country.as_deref().unwrap_or_default()
    ));

    for network in &config.networks {
        out.push_str("network={\n");
        out.push_str(&format!("\tssid=\"{}\"\n", network.ssid));

        if network.scan_ssid {
            out.push_str("\tscan_ssid=1\n");
        }

        let optional = [
            ("psk", &network.psk),
            ("key_mgmt", &network.key_mgmt),
            ("proto", &network.proto),
            ("pairwise", &network.pairwise),
            ("auth_alg", &network.auth_alg),
        ];
        for (key, value) in optional {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                out.push_str(&format!("\t{key}={value}\n"));
            }
        }

        if network.disabled {
            out.push_str("\tdisabled=1\n");
        }

        out.push_str("}\n\n");
    }

    out
}

fn key_values(text: &str) -> impl Iterator<Item = (&str, &str)> {
    text.lines().filter_map(|line| {
        let line = line.trim();
        if line.starts_with('#') {
            return None;
        }
        let (key, value) = line.split_once('=')?;
        let key = key.trim();
        (!key.is_empty() && !key.contains(['{', '}'])).then(|| (key, value.trim()))
    })
}

/// Wifi networks of the station mode in `wpa_supplicant.conf`
pub struct WpaConfigStore<'a, Executor, Fs, Services, Links> {
    executor: &'a Executor,
    fs: &'a Fs,
    services: &'a Services,
    links: &'a Links,
    config: &'a AppConfig,
}

impl<'a, Executor, Fs, Services, Links> WpaConfigStore<'a, Executor, Fs, Services, Links>
where
    Executor: CommandExecutor + Sync,
    Fs: FileSystem,
    Services: ServiceController,
    Links: LinkController,
{
    pub fn new(
        executor: &'a Executor,
        fs: &'a Fs,
        services: &'a Services,
        links: &'a Links,
        config: &'a AppConfig,
    ) -> Self {
        Self {
            executor,
            fs,
            services,
            links,
            config,
        }
    }

    /// Returns `None` if there is no configuration file
    pub fn get_config(&self) -> Result<Option<WpaConfig>> {
        let content = self
            .fs
            .read_to_string(&self.config.paths.wpa_supplicant_conf)
            .context("failed to read wpa_supplicant.conf")?;

        Ok(content.as_deref().map(parse_wpa_config))
    }

    /// Replace the whole file with `config` and restart the supplicant
    ///
    /// Plaintext passphrases are replaced by their derived keys before
    /// anything is written. Returns whether the supplicant restarted.
    pub async fn set_config(&self, mut config: WpaConfig) -> Result<bool> {
        debug!("set wpa config with {} networks", config.networks.len());

        config.validate_for_write()?;

        for network in &mut config.networks {
            if let Some(psk) = network.psk.as_mut()
                && !is_derived_key(psk)
            {
                *psk = derive_psk(&network.ssid, psk);
            }
        }

        self.fs
            .write_atomic(
                &self.config.paths.wpa_supplicant_conf,
                &render_wpa_config(&config),
                FILE_MODE,
            )
            .context("failed to write wpa_supplicant.conf")?;

        if let Err(e) = self.links.unblock_wifi().await {
            warn!("failed to unblock wifi: {e:#}");
        }

        self.restart().await
    }

    pub async fn add_or_update_network(&self, network: WpaNetwork) -> Result<bool> {
        info!("add or update network {}", network.ssid);

        let mut config = self.config_or_default()?;
        config.upsert_network(network);
        self.set_config(config).await
    }

    pub async fn remove_network(&self, ssid: &str) -> Result<bool> {
        info!("remove network {ssid}");

        let mut config = self.config_or_default()?;
        if !config.remove_network(ssid) {
            return Err(NetworkError::not_found(format!("network with ssid '{ssid}'")).into());
        }
        self.set_config(config).await
    }

    /// Configured SSIDs in file order
    pub fn ssids(&self) -> Result<Vec<String>> {
        Ok(self
            .get_config()?
            .map(|c| c.networks.into_iter().map(|n| n.ssid).collect())
            .unwrap_or_default())
    }

    pub fn network(&self, ssid: &str) -> Result<Option<WpaNetwork>> {
        Ok(self
            .get_config()?
            .and_then(|c| c.network(ssid).cloned()))
    }

    /// SSIDs currently visible to `iface`
    pub async fn scan_ssids(&self, iface: &str) -> Result<Vec<String>> {
        let output = execute_checked(
            self.executor,
            CommandLine::new("iwlist", [iface, "scan"]),
        )
        .await
        .context("failed to scan for networks")?;

        Ok(parse_scan_ssids(&output.stdout))
    }

    /// SSIDs of the networks the station is associated with
    pub async fn connected_ssids(&self) -> Result<Vec<String>> {
        let output = self
            .executor
            .execute(CommandLine::new("iwgetid", ["-r"]))
            .await?;

        // iwgetid exits non-zero when not associated
        if !output.is_success() {
            return Ok(vec![]);
        }

        Ok(parse_connected_ssids(&output.stdout))
    }

    pub async fn start(&self) -> Result<bool> {
        self.ensure_config_exists()?;

        let name = &self.config.services.wpa_supplicant;
        let mut ok = true;

        if !self.services.is_enabled(name).await {
            ok &= self.services.enable(name).await;
        }
        if !self.services.is_active(name).await {
            ok &= self.services.start(name).await;
        }

        Ok(ok)
    }

    pub async fn restart(&self) -> Result<bool> {
        self.ensure_config_exists()?;

        let name = &self.config.services.wpa_supplicant;
        let mut ok = true;

        if !self.services.is_enabled(name).await {
            ok &= self.services.enable(name).await;
        }
        ok &= self.services.restart(name).await;

        Ok(ok)
    }

    pub async fn stop(&self) -> bool {
        let name = &self.config.services.wpa_supplicant;
        let mut ok = true;

        if self.services.is_enabled(name).await {
            ok &= self.services.disable(name).await;
        }
        if self.services.is_active(name).await {
            ok &= self.services.stop(name).await;
        }

        ok
    }

    /// Country of the current configuration, if any
    pub fn country(&self) -> Result<Option<String>> {
        Ok(self
            .get_config()?
            .and_then(|c| c.country)
            .filter(|c| !c.is_empty()))
    }

    /// Current configuration with missing globals filled in, defaults if there is no file
    pub fn config_or_default(&self) -> Result<WpaConfig> {
        let defaults = WpaConfig::with_defaults(self.config);

        let Some(mut config) = self.get_config()? else {
            return Ok(defaults);
        };

        if config.ctrl_interface.is_empty() {
            config.ctrl_interface = defaults.ctrl_interface;
        }
        if config.country.as_deref().is_none_or(str::is_empty) {
            config.country = defaults.country;
        }

        Ok(config)
    }

    fn ensure_config_exists(&self) -> Result<()> {
        if !self.fs.exists(&self.config.paths.wpa_supplicant_conf) {
            return Err(NetworkError::precondition(
                "no wifi configuration found, add a network to configure at least one SSID",
            )
            .into());
        }
        Ok(())
    }
}
