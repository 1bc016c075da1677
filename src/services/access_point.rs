use super::{
    dhcp::{DhcpConfigStore, IpSettings},
    passphrase::is_derived_key,
};
use crate::{
    config::AppConfig,
    error::NetworkError,
    system::{
        CommandExecutor, CommandLine, FileSystem, LinkController, ServiceController,
        execute_checked,
        parsers::{ConnectedClient, parse_station_dump},
    },
};
use anyhow::{Context, Result};
use ini::{EscapePolicy, Ini, WriteOption};
use log::{debug, info};
use std::net::Ipv4Addr;

const DEFAULT_CHANNEL: &str = "acs_survey";
const HW_MODE: &str = "g";
const DHCP_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
const DHCP_LEASE_TIME: &str = "24h";

/// What the access point daemons get configured with
#[derive(Clone)]
pub struct AccessPointSettings {
    /// Interface the access point runs on, e.g. `ap0`
    pub interface: String,
    /// Wifi device the access point interface belongs to, e.g. `wlan0`
    pub physical_interface: String,
    pub ssid: String,
    pub psk: String,
    pub ip: Ipv4Addr,
    /// Picked automatically if `None`
    pub channel: Option<u8>,
    pub country: String,
}

/// Lease range on the host's /24 that does not contain the host itself
pub fn dhcp_range(ip: Ipv4Addr) -> (Ipv4Addr, Ipv4Addr) {
    let [a, b, c, host] = ip.octets();
    let (start, end) = if (100..=150).contains(&host) {
        (151, 200)
    } else {
        (100, 150)
    };

    (Ipv4Addr::new(a, b, c, start), Ipv4Addr::new(a, b, c, end))
}

pub fn render_hostapd_conf(settings: &AccessPointSettings) -> Result<String> {
    let channel = settings
        .channel
        .map_or_else(|| DEFAULT_CHANNEL.to_string(), |c| c.to_string());

    let mut ini = Ini::new();
    let mut general = ini.with_section(None::<String>);
    general
        .set("interface", &settings.interface)
        .set("driver", "nl80211")
        .set("ssid", &settings.ssid)
        .set("hw_mode", HW_MODE)
        .set("channel", channel)
        .set("country_code", &settings.country)
        .set("ieee80211d", "1")
        .set("wmm_enabled", "0")
        .set("macaddr_acl", "0")
        .set("auth_algs", "1")
        .set("ignore_broadcast_ssid", "0")
        .set("wpa", "2");

    if is_derived_key(&settings.psk) {
        general.set("wpa_psk", &settings.psk);
    } else {
        general.set("wpa_passphrase", &settings.psk);
    }

    general
        .set("wpa_key_mgmt", "WPA-PSK")
        .set("rsn_pairwise", "CCMP");

    write_ini(&ini)
}

pub fn render_dnsmasq_conf(settings: &AccessPointSettings) -> Result<String> {
    let (start, end) = dhcp_range(settings.ip);

    let mut ini = Ini::new();
    ini.with_section(None::<String>)
        .set("interface", format!("lo,{}", settings.interface))
        .set("no-dhcp-interface", &settings.physical_interface)
        .set(
            "dhcp-range",
            format!("{start},{end},{DHCP_NETMASK},{DHCP_LEASE_TIME}"),
        )
        .set("dhcp-option", format!("option:dns-server,{}", settings.ip));

    write_ini(&ini)
}

fn write_ini(ini: &Ini) -> Result<String> {
    let mut buf = Vec::new();
    ini.write_to_opt(
        &mut buf,
        WriteOption {
            escape_policy: EscapePolicy::Nothing,
            ..Default::default()
        },
    )
    .context("failed to render config")?;

    String::from_utf8(buf).context("rendered config is not utf-8")
}

/// hostapd and dnsmasq, the daemons of the access point mode
pub struct AccessPoint<'a, Executor, Fs, Services, Links> {
    executor: &'a Executor,
    fs: &'a Fs,
    services: &'a Services,
    links: &'a Links,
    config: &'a AppConfig,
}

impl<'a, Executor, Fs, Services, Links> AccessPoint<'a, Executor, Fs, Services, Links>
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

    /// Write the hostapd and dnsmasq configuration files
    pub fn configure(&self, settings: &AccessPointSettings) -> Result<()> {
        info!(
            "configure access point: interface={}, ssid={}, psk={{suppressed}}, ip={}, channel={:?}, country={}",
            settings.interface, settings.ssid, settings.ip, settings.channel, settings.country
        );

        let paths = &self.config.paths;

        debug!("write dnsmasq config to {}", paths.dnsmasq_conf.display());
        self.fs
            .write_atomic(&paths.dnsmasq_conf, &render_dnsmasq_conf(settings)?, 0o644)
            .context("failed to write dnsmasq config")?;

        debug!("write hostapd config to {}", paths.hostapd_conf.display());
        self.fs
            .write_atomic(&paths.hostapd_conf, &render_hostapd_conf(settings)?, 0o600)
            .context("failed to write hostapd config")?;

        Ok(())
    }

    /// Both configuration files exist and both daemons run
    pub async fn is_enabled(&self) -> bool {
        let paths = &self.config.paths;
        let names = &self.config.services;

        self.fs.exists(&paths.hostapd_conf)
            && self.fs.exists(&paths.dnsmasq_conf)
            && self.services.is_active(&names.hostapd).await
            && self.services.is_active(&names.dnsmasq).await
    }

    /// Fail with an actionable message unless the access point can be started
    pub fn ensure_configured(&self) -> Result<()> {
        let paths = &self.config.paths;

        if !self.fs.exists(&paths.hostapd_conf) {
            return Err(NetworkError::precondition(
                "no hostapd configuration found, configure the access point first",
            )
            .into());
        }

        if !self.fs.exists(&paths.dnsmasq_conf) {
            return Err(NetworkError::precondition(
                "no dnsmasq configuration found, configure the access point first",
            )
            .into());
        }

        if !self.dhcp().is_access_point_configured()? {
            return Err(NetworkError::precondition(
                "no access point address configured, configure the access point first",
            )
            .into());
        }

        Ok(())
    }

    /// Enable and start whatever is not enabled or running yet
    pub async fn start(&self) -> Result<bool> {
        self.ensure_configured()?;

        let mut ok = self.enable_services().await;

        for name in self.service_names() {
            if !self.services.is_active(name).await {
                ok &= self.services.start(name).await;
            }
        }

        Ok(ok)
    }

    pub async fn stop(&self) -> bool {
        let mut ok = true;

        for name in self.service_names() {
            if self.services.is_active(name).await {
                ok &= self.services.stop(name).await;
            }
        }

        for name in self.service_names() {
            if self.services.is_enabled(name).await {
                ok &= self.services.disable(name).await;
            }
        }

        ok
    }

    /// Stop the access point and remove its configuration
    ///
    /// If anything was removed, `interface` goes back to DHCP.
    pub async fn delete_configuration(&self, interface: &str) -> Result<bool> {
        info!("delete access point configuration");

        let mut ok = self.stop().await;

        let mut removed = false;
        for path in [&self.config.paths.hostapd_conf, &self.config.paths.dnsmasq_conf] {
            removed |= self
                .fs
                .remove(path)
                .context("failed to remove access point config")?;
        }

        if removed {
            ok &= self
                .dhcp()
                .set_ip_address(interface, IpSettings::dhcp())
                .await?
                .applied;
        }

        Ok(ok)
    }

    /// Stations associated with the access point on `interface`
    pub async fn connected_clients(&self, interface: &str) -> Result<Vec<ConnectedClient>> {
        let output = execute_checked(
            self.executor,
            CommandLine::new("iw", ["dev", interface, "station", "dump"]),
        )
        .await
        .context("failed to list connected clients")?;

        Ok(parse_station_dump(&output.stdout, interface))
    }

    async fn enable_services(&self) -> bool {
        let mut ok = true;

        for name in self.service_names() {
            if !self.services.is_enabled(name).await {
                ok &= self.services.unmask(name).await;
                ok &= self.services.enable(name).await;
            }
        }

        ok
    }

    fn service_names(&self) -> [&'a str; 2] {
        [
            self.config.services.hostapd.as_str(),
            self.config.services.dnsmasq.as_str(),
        ]
    }

    fn dhcp(&self) -> DhcpConfigStore<'a, Fs, Services, Links> {
        DhcpConfigStore::new(self.fs, self.services, self.links, self.config)
    }
}
