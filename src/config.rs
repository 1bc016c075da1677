use anyhow::{Context, Result, ensure};
use std::{env, path::PathBuf, time::Duration};

/// Application configuration loaded and validated at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Locations of the OS-owned configuration files
    pub paths: PathConfig,

    /// systemd unit names of the managed daemons
    pub services: ServiceNames,

    /// Command timeouts and settle waits
    pub timing: TimingConfig,

    /// Defaults for the wifi configuration
    pub wifi: WifiDefaults,

    /// Prefix privileged commands with sudo
    pub use_sudo: bool,
}

#[derive(Clone, Debug)]
pub struct PathConfig {
    pub dhcpcd_conf: PathBuf,
    pub wpa_supplicant_conf: PathBuf,
    pub hostapd_conf: PathBuf,
    pub dnsmasq_conf: PathBuf,
}

#[derive(Clone, Debug)]
pub struct ServiceNames {
    pub dhcpcd: String,
    pub wpa_supplicant: String,
    pub hostapd: String,
    pub dnsmasq: String,
}

#[derive(Clone, Debug)]
pub struct TimingConfig {
    pub command_timeout: Duration,
    pub link_settle_timeout: Duration,
    pub poll_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct WifiDefaults {
    pub country: String,
    pub ctrl_interface: String,
    pub ap_interface: Option<String>,
    pub ap_interface_prefix: String,
}

impl AppConfig {
    /// Load and validate all configuration from environment variables
    ///
    /// Every setting has a default matching a stock Raspberry Pi OS image, so
    /// an empty environment yields a usable configuration.
    pub fn from_env() -> Result<Self> {
        let paths = PathConfig::load();
        let services = ServiceNames::load();
        let timing = TimingConfig::load()?;
        let wifi = WifiDefaults::load()?;
        let use_sudo = parse_bool("USE_SUDO", false)?;

        Ok(Self {
            paths,
            services,
            timing,
            wifi,
            use_sudo,
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: PathConfig::default(),
            services: ServiceNames::default(),
            timing: TimingConfig::default(),
            wifi: WifiDefaults::default(),
            use_sudo: false,
        }
    }
}

impl PathConfig {
    fn load() -> Self {
        let defaults = Self::default();

        Self {
            dhcpcd_conf: env_path("DHCPCD_CONF_PATH", defaults.dhcpcd_conf),
            wpa_supplicant_conf: env_path("WPA_SUPPLICANT_CONF_PATH", defaults.wpa_supplicant_conf),
            hostapd_conf: env_path("HOSTAPD_CONF_PATH", defaults.hostapd_conf),
            dnsmasq_conf: env_path("DNSMASQ_CONF_PATH", defaults.dnsmasq_conf),
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            dhcpcd_conf: PathBuf::from("/etc/dhcpcd.conf"),
            wpa_supplicant_conf: PathBuf::from("/etc/wpa_supplicant/wpa_supplicant.conf"),
            hostapd_conf: PathBuf::from("/etc/hostapd/hostapd.conf"),
            dnsmasq_conf: PathBuf::from("/etc/dnsmasq.conf"),
        }
    }
}

impl ServiceNames {
    fn load() -> Self {
        let defaults = Self::default();

        Self {
            dhcpcd: env::var("DHCPCD_SERVICE").unwrap_or(defaults.dhcpcd),
            wpa_supplicant: env::var("WPA_SUPPLICANT_SERVICE").unwrap_or(defaults.wpa_supplicant),
            hostapd: env::var("HOSTAPD_SERVICE").unwrap_or(defaults.hostapd),
            dnsmasq: env::var("DNSMASQ_SERVICE").unwrap_or(defaults.dnsmasq),
        }
    }
}

impl Default for ServiceNames {
    fn default() -> Self {
        Self {
            dhcpcd: "dhcpcd".to_string(),
            wpa_supplicant: "wpa_supplicant.service".to_string(),
            hostapd: "hostapd".to_string(),
            dnsmasq: "dnsmasq".to_string(),
        }
    }
}

impl TimingConfig {
    fn load() -> Result<Self> {
        let command_timeout = Duration::from_secs(parse_u64("COMMAND_TIMEOUT_SECS", 30)?);
        let link_settle_timeout = Duration::from_secs(parse_u64("LINK_SETTLE_TIMEOUT_SECS", 5)?);
        let poll_interval = Duration::from_millis(parse_u64("POLL_INTERVAL_MILLIS", 250)?);

        ensure!(
            !poll_interval.is_zero(),
            "failed to parse POLL_INTERVAL_MILLIS: must be greater than zero"
        );

        Ok(Self {
            command_timeout,
            link_settle_timeout,
            poll_interval,
        })
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            link_settle_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl WifiDefaults {
    fn load() -> Result<Self> {
        let defaults = Self::default();

        let country = env::var("WIFI_COUNTRY")
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or(defaults.country);
        ensure!(
            country.len() == 2 && country.chars().all(|c| c.is_ascii_uppercase()),
            "failed to parse WIFI_COUNTRY: expected an ISO 3166 alpha-2 code, got {country:?}"
        );

        let ctrl_interface = env::var("WPA_CTRL_INTERFACE").unwrap_or(defaults.ctrl_interface);
        let ap_interface = env::var("AP_INTERFACE").ok().filter(|s| !s.is_empty());
        let ap_interface_prefix =
            env::var("AP_INTERFACE_PREFIX").unwrap_or(defaults.ap_interface_prefix);

        Ok(Self {
            country,
            ctrl_interface,
            ap_interface,
            ap_interface_prefix,
        })
    }

    /// Name of the interface the access point runs on for `iface`
    ///
    /// `AP_INTERFACE` wins if set; otherwise the prefix is combined with the
    /// trailing index of the physical name (`wlan0` -> `ap0`).
    pub fn ap_interface_for(&self, iface: &str) -> String {
        if let Some(name) = &self.ap_interface {
            return name.clone();
        }

        let index = iface.trim_start_matches(|c: char| !c.is_ascii_digit());
        let index = if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
            "0"
        } else {
            index
        };

        format!("{}{index}", self.ap_interface_prefix)
    }
}

impl Default for WifiDefaults {
    fn default() -> Self {
        Self {
            country: "CH".to_string(),
            ctrl_interface: "DIR=/var/run/wpa_supplicant GROUP=netdev".to_string(),
            ap_interface: None,
            ap_interface_prefix: "ap".to_string(),
        }
    }
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    env::var_os(key).map(PathBuf::from).unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .parse::<u64>()
            .context(format!("failed to parse {key}: invalid format")),
        Err(_) => Ok(default),
    }
}

fn parse_bool(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Ok(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => anyhow::bail!("failed to parse {key}: invalid format"),
        },
        Err(_) => Ok(default),
    }
}
