use super::profile::ProfileConfigStore;
use crate::{
    config::AppConfig,
    error::NetworkError,
    system::{FileSystem, LinkController, ServiceController},
};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;
use std::{net::Ipv4Addr, sync::LazyLock};

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_CIDR: u8 = 24;
const FILE_MODE: u32 = 0o644;
const AP_FLAG: &str = "nohook wpa_supplicant";

const DHCPCD: ProfileConfigStore =
    ProfileConfigStore::new("interface", &["interface", "ssid", "profile"]);

static IP_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*static\s+ip_address=(\d+\.\d+\.\d+\.\d+)(?:/(\d+))?")
        .expect("invalid ip_address regex")
});

static ROUTERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*static\s+routers=(?:.*\s+)?(\d+\.\d+\.\d+\.\d+)")
        .expect("invalid routers regex")
});

static DNS_SERVERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*static\s+domain_name_servers=(?:.*\s+)?(\d+\.\d+\.\d+\.\d+)")
        .expect("invalid domain_name_servers regex")
});

static NOHOOK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*nohook\s+wpa_supplicant\s*$").expect("invalid nohook regex")
});

// ============================================================================
// Structs
// ============================================================================

/// Addressing of one interface as stored in `dhcpcd.conf`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DhcpProfile {
    pub interface: String,
    pub ip: Option<Ipv4Addr>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub dns_server: Option<Ipv4Addr>,
    pub for_access_point: bool,
}

/// Requested addressing for `DhcpConfigStore::set_ip_address`
///
/// `None` keeps the stored value where possible, `0.0.0.0` as `ip` switches
/// the interface to DHCP, as `gateway` or `dns_server` it drops the line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IpSettings {
    pub ip: Option<Ipv4Addr>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub dns_server: Option<Ipv4Addr>,
    pub for_access_point: Option<bool>,
}

impl IpSettings {
    /// Pure DHCP, no static block
    pub fn dhcp() -> Self {
        Self {
            ip: Some(Ipv4Addr::UNSPECIFIED),
            ..Default::default()
        }
    }
}

/// Outcome of `DhcpConfigStore::set_ip_address`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IpUpdate {
    /// The file was rewritten
    pub changed: bool,
    /// The dhcp client restart or link cycle succeeded, or none was needed
    pub applied: bool,
}

impl DhcpProfile {
    pub fn cidr(&self) -> Option<u8> {
        self.subnet_mask.map(cidr_from_mask)
    }

    fn from_block(key: &str, fields: &[String]) -> Result<Self> {
        let mut profile = Self {
            interface: key.to_string(),
            ..Default::default()
        };

        for line in fields {
            if let Some(caps) = IP_ADDRESS.captures(line) {
                profile.ip = caps[1].parse().ok();
                if let Some(cidr) = caps.get(2) {
                    let cidr = cidr
                        .as_str()
                        .parse::<u8>()
                        .map_err(|_| NetworkError::validation(format!("invalid prefix in '{line}'")))?;
                    profile.subnet_mask = Some(mask_from_cidr(cidr)?);
                }
            } else if let Some(caps) = ROUTERS.captures(line) {
                profile.gateway = caps[1].parse().ok();
            } else if let Some(caps) = DNS_SERVERS.captures(line) {
                profile.dns_server = caps[1].parse().ok();
            } else if NOHOOK.is_match(line) {
                profile.for_access_point = true;
            }
        }

        Ok(profile)
    }

    /// Field lines of the block, empty if the interface is left to DHCP
    ///
    /// Managed lines replace their counterparts in `stored`, new ones go
    /// after the closest preceding managed line. Comments, blank and unknown
    /// lines keep their place.
    fn render(&self, stored: &[String]) -> Vec<String> {
        let mut wanted = self.managed_lines();
        if wanted.iter().all(Option::is_none) {
            return vec![];
        }

        let mut lines: Vec<(Option<Field>, String)> = Vec::with_capacity(stored.len());

        for line in stored {
            match Field::of(line) {
                // later duplicates are dropped
                Some(field) => {
                    if let Some(new) = wanted[field as usize].take() {
                        lines.push((Some(field), new));
                    }
                }
                None => lines.push((None, line.clone())),
            }
        }

        for field in Field::ALL {
            let Some(new) = wanted[field as usize].take() else {
                continue;
            };
            let at = match lines
                .iter()
                .rposition(|(f, _)| f.is_some_and(|f| f < field))
            {
                Some(i) => i + 1,
                None => lines.iter().position(|(f, _)| f.is_some()).unwrap_or(0),
            };
            lines.insert(at, (Some(field), new));
        }

        while lines
            .last()
            .is_some_and(|(f, line)| f.is_none() && line.trim().is_empty())
        {
            lines.pop();
        }

        lines.into_iter().map(|(_, line)| line).collect()
    }

    /// Lines for each `Field`, all `None` if the interface is left to DHCP
    fn managed_lines(&self) -> [Option<String>; 4] {
        let mut lines = [None, None, None, None];
        let static_ip = self.ip.filter(|ip| !ip.is_unspecified());

        if static_ip.is_none()
            && (self.ip.is_some() || (self.gateway.is_none() && self.dns_server.is_none()))
        {
            return lines;
        }

        if let Some(ip) = static_ip {
            let cidr = self.cidr().unwrap_or(DEFAULT_CIDR);
            lines[Field::IpAddress as usize] = Some(format!("static ip_address={ip}/{cidr}"));
            if self.for_access_point {
                lines[Field::ApFlag as usize] = Some(AP_FLAG.to_string());
            }
        }

        if let Some(gateway) = self.gateway.filter(|g| !g.is_unspecified()) {
            lines[Field::Routers as usize] = Some(format!("static routers={gateway}"));
        }

        if let Some(dns) = self.dns_server.filter(|d| !d.is_unspecified()) {
            lines[Field::DnsServers as usize] = Some(format!("static domain_name_servers={dns}"));
        }

        lines
    }
}

/// Block lines managed by `DhcpConfigStore`, in the order they are written
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Field {
    IpAddress,
    ApFlag,
    Routers,
    DnsServers,
}

impl Field {
    const ALL: [Field; 4] = [
        Field::IpAddress,
        Field::ApFlag,
        Field::Routers,
        Field::DnsServers,
    ];

    fn of(line: &str) -> Option<Self> {
        if IP_ADDRESS.is_match(line) {
            Some(Field::IpAddress)
        } else if NOHOOK.is_match(line) {
            Some(Field::ApFlag)
        } else if ROUTERS.is_match(line) {
            Some(Field::Routers)
        } else if DNS_SERVERS.is_match(line) {
            Some(Field::DnsServers)
        } else {
            None
        }
    }
}

/// Prefix length of `mask`, counting only the leading run of set bits
///
/// `255.0.255.0` yields 8.
pub fn cidr_from_mask(mask: Ipv4Addr) -> u8 {
    u32::from(mask).leading_ones() as u8
}

pub fn mask_from_cidr(cidr: u8) -> Result<Ipv4Addr> {
    if cidr > 32 {
        return Err(NetworkError::validation(format!("prefix length {cidr} exceeds 32")).into());
    }

    Ok(Ipv4Addr::from(u32::MAX.checked_shl(32 - u32::from(cidr)).unwrap_or(0)))
}

// ============================================================================
// Store
// ============================================================================

/// Interface addressing in `dhcpcd.conf`
pub struct DhcpConfigStore<'a, Fs, Services, Links> {
    fs: &'a Fs,
    services: &'a Services,
    links: &'a Links,
    config: &'a AppConfig,
}

impl<'a, Fs, Services, Links> DhcpConfigStore<'a, Fs, Services, Links>
where
    Fs: FileSystem,
    Services: ServiceController,
    Links: LinkController,
{
    pub fn new(fs: &'a Fs, services: &'a Services, links: &'a Links, config: &'a AppConfig) -> Self {
        Self {
            fs,
            services,
            links,
            config,
        }
    }

    /// All profiles in file order, empty if the file does not exist
    pub fn read_profiles(&self) -> Result<Vec<DhcpProfile>> {
        let content = self.read()?;

        DHCPCD
            .parse(&content)
            .iter()
            .map(|block| DhcpProfile::from_block(&block.key, &block.fields))
            .collect::<Result<Vec<_>>>()
            .context("failed to parse dhcpcd.conf")
    }

    pub fn profile(&self, iface: &str) -> Result<Option<DhcpProfile>> {
        Ok(self
            .read_profiles()?
            .into_iter()
            .find(|p| p.interface == iface))
    }

    pub fn is_access_point_configured(&self) -> Result<bool> {
        Ok(self.read_profiles()?.iter().any(|p| p.for_access_point))
    }

    pub fn configured_ip(&self, iface: &str) -> Result<Ipv4Addr> {
        self.configured(iface, |p| p.ip)
    }

    pub fn configured_netmask(&self, iface: &str) -> Result<Ipv4Addr> {
        self.configured(iface, |p| p.subnet_mask)
    }

    pub fn configured_gateway(&self, iface: &str) -> Result<Ipv4Addr> {
        self.configured(iface, |p| p.gateway)
    }

    pub fn configured_dns(&self, iface: &str) -> Result<Ipv4Addr> {
        self.configured(iface, |p| p.dns_server)
    }

    /// Update the profile of `iface` and apply it
    ///
    /// # Arguments
    /// * `iface` - Interface name, the key of the profile
    /// * `settings` - Requested addressing, merged with the stored profile
    ///
    /// # Returns
    /// Whether the file changed and whether applying the change succeeded
    pub async fn set_ip_address(&self, iface: &str, settings: IpSettings) -> Result<IpUpdate> {
        info!("set ip address of {iface}: {settings:?}");

        let content = self.read()?;
        let existing = DHCPCD
            .find(&content, iface)
            .map(|block| DhcpProfile::from_block(&block.key, &block.fields).map(|p| (block, p)))
            .transpose()
            .context("failed to parse dhcpcd.conf")?;

        let mut profile = DhcpProfile {
            interface: iface.to_string(),
            ip: settings.ip,
            subnet_mask: settings.subnet_mask,
            gateway: settings.gateway,
            dns_server: settings.dns_server,
            for_access_point: settings.for_access_point.unwrap_or(false),
        };

        if let Some((_, stored)) = &existing {
            let to_dhcp = settings.ip.is_some_and(|ip| ip.is_unspecified());
            if !to_dhcp && !stored.for_access_point && settings.for_access_point != Some(true) {
                profile.ip = profile.ip.or(stored.ip);
                profile.subnet_mask = profile.subnet_mask.or(stored.subnet_mask);
                profile.gateway = profile.gateway.or(stored.gateway);
                profile.dns_server = profile.dns_server.or(stored.dns_server);
            }
        }

        let stored_fields = existing
            .as_ref()
            .map(|(block, _)| block.fields.as_slice())
            .unwrap_or_default();
        let fields = profile.render(stored_fields);

        let unchanged = match &existing {
            Some((block, _)) => block.fields == fields,
            None => fields.is_empty(),
        };

        if unchanged {
            debug!("dhcp profile of {iface} unchanged");
            return Ok(IpUpdate {
                changed: false,
                applied: true,
            });
        }

        let updated = DHCPCD.upsert(&content, iface, &fields);
        self.fs
            .write_atomic(&self.config.paths.dhcpcd_conf, &updated, FILE_MODE)
            .context("failed to write dhcpcd.conf")?;

        let applied = self.apply(iface, settings.for_access_point.is_some()).await;

        Ok(IpUpdate {
            changed: true,
            applied,
        })
    }

    async fn apply(&self, iface: &str, ap_mode_changed: bool) -> bool {
        if ap_mode_changed {
            return self.services.restart(&self.config.services.dhcpcd).await;
        }

        if !self.links.is_up(iface).await {
            return true;
        }

        debug!("cycle link {iface} to apply new addressing");

        if let Err(e) = self.links.down(iface).await {
            warn!("failed to set {iface} down: {e:#}");
            return false;
        }

        if let Err(e) = self.links.up(iface).await {
            warn!("failed to set {iface} up: {e:#}");
            return false;
        }

        true
    }

    fn configured<F>(&self, iface: &str, field: F) -> Result<Ipv4Addr>
    where
        F: Fn(&DhcpProfile) -> Option<Ipv4Addr>,
    {
        Ok(self
            .profile(iface)?
            .and_then(|p| field(&p))
            .unwrap_or(Ipv4Addr::UNSPECIFIED))
    }

    fn read(&self) -> Result<String> {
        Ok(self
            .fs
            .read_to_string(&self.config.paths.dhcpcd_conf)?
            .unwrap_or_default())
    }
}
