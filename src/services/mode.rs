use super::{
    access_point::{AccessPoint, AccessPointSettings},
    dhcp::{DhcpConfigStore, DhcpProfile, IpSettings},
    passphrase::is_valid_psk,
    wait::poll_until,
    wpa::{WpaConfigStore, WpaNetwork, is_country_code},
};
use crate::{
    config::AppConfig,
    error::NetworkError,
    system::{
        CommandExecutor, CommandLine, FileSystem, LinkController, ServiceController,
        execute_checked,
        parsers::{ConnectedClient, parse_network_list},
    },
};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::{fmt, net::Ipv4Addr};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Requests and reports
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    Unconfigured,
    Station,
    AccessPoint,
}

/// Access point to bring up with `ModeOrchestrator::enter_access_point_mode`
#[derive(Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AccessPointRequest {
    #[validate(min_length = 1)]
    #[validate(max_length = 32)]
    pub ssid: String,
    #[validate(min_length = 8)]
    #[validate(max_length = 64)]
    pub psk: String,
    pub ip: Ipv4Addr,
    /// Picked automatically if `None`
    pub channel: Option<u8>,
    /// Falls back to the country of `wpa_supplicant.conf`
    pub country: Option<String>,
}

impl fmt::Debug for AccessPointRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessPointRequest")
            .field("ssid", &self.ssid)
            .field("psk", &"{suppressed}")
            .field("ip", &self.ip)
            .field("channel", &self.channel)
            .field("country", &self.country)
            .finish()
    }
}

/// Changes to a single interface, see `ModeOrchestrator::apply`
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InterfaceRequest {
    /// `None` keeps the stored value, `ip` `0.0.0.0` switches to DHCP
    SetStaticIp {
        ip: Option<Ipv4Addr>,
        netmask: Option<Ipv4Addr>,
        gateway: Option<Ipv4Addr>,
        dns: Option<Ipv4Addr>,
    },
    /// Start the supplicant and optionally select one of its networks
    EnableStation { ssid: Option<String> },
    /// Start the already configured access point
    EnableAccessPoint,
    SetLinkState { up: bool },
}

/// Outcome of a transition
///
/// Steps after the first mutation are best-effort, the ones that failed are
/// listed here instead of aborting the transition. Nothing is rolled back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionReport {
    pub interface: String,
    /// Mode reached, `None` if the request did not switch modes
    pub mode: Option<Mode>,
    pub failed_steps: Vec<String>,
}

impl TransitionReport {
    fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            mode: None,
            failed_steps: vec![],
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed_steps.is_empty()
    }

    fn record(&mut self, step: &str, ok: bool) {
        if !ok {
            warn!("{step} failed on {}", self.interface);
            self.failed_steps.push(step.to_string());
        }
    }

    fn check(&mut self, step: &str, result: Result<bool>) {
        match result {
            Ok(ok) => self.record(step, ok),
            Err(e) => {
                warn!("{step} failed on {}: {e:#}", self.interface);
                self.failed_steps.push(format!("{step}: {e:#}"));
            }
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub interface: String,
    pub mode: Mode,
    pub profile: Option<DhcpProfile>,
    pub configured_ssids: Vec<String>,
    pub connected_ssids: Vec<String>,
    pub access_point_clients: Vec<ConnectedClient>,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Switches wifi interfaces between station and access point mode
///
/// Owns the collaborators and hands out short-lived stores borrowing them.
/// Calls are not serialized, callers run one transition at a time.
pub struct ModeOrchestrator<Executor, Services, Links, Fs> {
    executor: Executor,
    services: Services,
    links: Links,
    fs: Fs,
    config: AppConfig,
}

impl<Executor, Services, Links, Fs> ModeOrchestrator<Executor, Services, Links, Fs>
where
    Executor: CommandExecutor + Sync,
    Services: ServiceController,
    Links: LinkController,
    Fs: FileSystem,
{
    pub fn new(
        executor: Executor,
        services: Services,
        links: Links,
        fs: Fs,
        config: AppConfig,
    ) -> Self {
        Self {
            executor,
            services,
            links,
            fs,
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn dhcp(&self) -> DhcpConfigStore<'_, Fs, Services, Links> {
        DhcpConfigStore::new(&self.fs, &self.services, &self.links, &self.config)
    }

    pub fn wpa(&self) -> WpaConfigStore<'_, Executor, Fs, Services, Links> {
        WpaConfigStore::new(
            &self.executor,
            &self.fs,
            &self.services,
            &self.links,
            &self.config,
        )
    }

    pub fn access_point(&self) -> AccessPoint<'_, Executor, Fs, Services, Links> {
        AccessPoint::new(
            &self.executor,
            &self.fs,
            &self.services,
            &self.links,
            &self.config,
        )
    }

    /// Configure and start an access point on the alias of `iface`
    ///
    /// A running station session is left alone.
    ///
    /// # Arguments
    /// * `iface` - Wifi device, e.g. `wlan0`
    /// * `request` - Access point settings, validated before anything changes
    /// * `cancel` - Interrupts waiting for the access point interface
    ///
    /// # Returns
    /// The report of the best-effort steps
    pub async fn enter_access_point_mode(
        &self,
        iface: &str,
        request: &AccessPointRequest,
        cancel: &CancellationToken,
    ) -> Result<TransitionReport> {
        let country = self.validate_access_point(request)?;
        ensure_not_cancelled(cancel)?;

        let alias = self.config.wifi.ap_interface_for(iface);
        info!("enter access point mode on {alias} ({iface}): {request:?}");

        let mut report = TransitionReport::new(iface);

        let update = self
            .dhcp()
            .set_ip_address(
                &alias,
                IpSettings {
                    ip: Some(request.ip),
                    for_access_point: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        report.record("apply access point address", update.applied);

        self.access_point().configure(&AccessPointSettings {
            interface: alias.clone(),
            physical_interface: iface.to_string(),
            ssid: request.ssid.clone(),
            psk: request.psk.clone(),
            ip: request.ip,
            channel: request.channel,
            country,
        })?;

        report.check("unblock wifi", self.links.unblock_wifi().await.map(|()| true));

        if alias != iface && !self.links.exists(&alias).await {
            let created = self.create_ap_interface(iface, &alias, cancel).await?;
            report.record("create access point interface", created);
        }

        report.check("start access point", self.access_point().start().await);

        report.mode = Some(Mode::AccessPoint);
        Ok(report)
    }

    /// Leave access point mode and connect `iface` to `network`
    ///
    /// # Arguments
    /// * `iface` - Wifi device, e.g. `wlan0`
    /// * `network` - Added to `wpa_supplicant.conf` or replacing the entry with its SSID
    /// * `country` - Replaces the configured country if set
    /// * `cancel` - Interrupts the link settle waits
    ///
    /// # Returns
    /// The report of the best-effort steps
    pub async fn enter_station_mode(
        &self,
        iface: &str,
        network: WpaNetwork,
        country: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<TransitionReport> {
        let wpa = self.wpa();

        let mut wpa_config = wpa.config_or_default()?;
        if let Some(country) = country {
            wpa_config.country = Some(country.trim().to_ascii_uppercase());
        }
        wpa_config.upsert_network(network);
        wpa_config.validate_for_write()?;
        ensure_not_cancelled(cancel)?;

        let alias = self.config.wifi.ap_interface_for(iface);
        info!("enter station mode on {iface}");

        let mut report = TransitionReport::new(iface);

        report.record("stop access point", self.access_point().stop().await);

        let update = self
            .dhcp()
            .set_ip_address(
                &alias,
                IpSettings {
                    for_access_point: Some(false),
                    ..Default::default()
                },
            )
            .await?;
        report.record("clear access point address", update.applied);

        report.check("write wifi configuration", wpa.set_config(wpa_config).await);

        self.restart_supplicant(iface, &mut report, cancel).await?;

        report.mode = Some(Mode::Station);
        Ok(report)
    }

    /// Stop the access point and the supplicant and set `iface` down
    pub async fn stop_access_point(&self, iface: &str) -> Result<TransitionReport> {
        info!("stop access point on {iface}");

        let mut report = TransitionReport::new(iface);

        report.record("stop access point", self.access_point().stop().await);
        report.record("stop wpa_supplicant", self.wpa().stop().await);
        report.check("set link down", self.links.down(iface).await.map(|()| true));

        report.mode = Some(Mode::Unconfigured);
        Ok(report)
    }

    /// Run a single `InterfaceRequest` against `iface`
    pub async fn apply(
        &self,
        iface: &str,
        request: InterfaceRequest,
        cancel: &CancellationToken,
    ) -> Result<TransitionReport> {
        debug!("apply {request:?} to {iface}");

        match request {
            InterfaceRequest::SetStaticIp {
                ip,
                netmask,
                gateway,
                dns,
            } => {
                let mut report = TransitionReport::new(iface);
                let update = self
                    .dhcp()
                    .set_ip_address(
                        iface,
                        IpSettings {
                            ip,
                            subnet_mask: netmask,
                            gateway,
                            dns_server: dns,
                            for_access_point: None,
                        },
                    )
                    .await?;
                report.record("apply ip address", update.applied);
                Ok(report)
            }
            InterfaceRequest::EnableStation { ssid } => {
                self.enable_station(iface, ssid.as_deref(), cancel).await
            }
            InterfaceRequest::EnableAccessPoint => self.enable_access_point(iface, cancel).await,
            InterfaceRequest::SetLinkState { up } => {
                let mut report = TransitionReport::new(iface);

                if self.links.is_up(iface).await == up {
                    debug!("link {iface} already {}", if up { "up" } else { "down" });
                    return Ok(report);
                }

                let result = if up {
                    self.links.up(iface).await
                } else {
                    self.links.down(iface).await
                };
                report.check("set link state", result.map(|()| true));
                Ok(report)
            }
        }
    }

    pub async fn current_mode(&self) -> Mode {
        if self.access_point().is_enabled().await {
            Mode::AccessPoint
        } else if self
            .services
            .is_active(&self.config.services.wpa_supplicant)
            .await
        {
            Mode::Station
        } else {
            Mode::Unconfigured
        }
    }

    pub async fn status(&self, iface: &str) -> Result<StatusReport> {
        let mode = self.current_mode().await;
        let wpa = self.wpa();

        let connected_ssids = if mode == Mode::Station {
            wpa.connected_ssids().await.unwrap_or_else(|e| {
                warn!("failed to get connected ssids: {e:#}");
                vec![]
            })
        } else {
            vec![]
        };

        let access_point_clients = if mode == Mode::AccessPoint {
            let alias = self.config.wifi.ap_interface_for(iface);
            self.access_point()
                .connected_clients(&alias)
                .await
                .unwrap_or_else(|e| {
                    warn!("failed to get access point clients: {e:#}");
                    vec![]
                })
        } else {
            vec![]
        };

        Ok(StatusReport {
            interface: iface.to_string(),
            mode,
            profile: self.dhcp().profile(iface)?,
            configured_ssids: wpa.ssids()?,
            connected_ssids,
            access_point_clients,
        })
    }

    async fn enable_station(
        &self,
        iface: &str,
        ssid: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<TransitionReport> {
        let Some(wpa_config) = self.wpa().get_config()? else {
            return Err(NetworkError::precondition(
                "no wifi configuration found, add a network to configure at least one SSID",
            )
            .into());
        };

        if let Some(ssid) = ssid
            && wpa_config.network(ssid).is_none()
        {
            return Err(NetworkError::not_found(format!("network with ssid '{ssid}'")).into());
        }
        ensure_not_cancelled(cancel)?;

        info!("enable station on {iface}");

        let mut report = TransitionReport::new(iface);

        report.record("stop access point", self.access_point().stop().await);
        self.restart_supplicant(iface, &mut report, cancel).await?;

        if let Some(ssid) = ssid {
            let selected = self.select_network(iface, ssid, cancel).await?;
            report.record("select network", selected);
        }

        report.mode = Some(Mode::Station);
        Ok(report)
    }

    async fn enable_access_point(
        &self,
        iface: &str,
        cancel: &CancellationToken,
    ) -> Result<TransitionReport> {
        self.access_point().ensure_configured()?;
        ensure_not_cancelled(cancel)?;

        let alias = self.config.wifi.ap_interface_for(iface);
        info!("enable access point on {alias} ({iface})");

        let mut report = TransitionReport::new(iface);

        report.record("stop wpa_supplicant", self.wpa().stop().await);
        report.check("set link down", self.links.down(iface).await.map(|()| true));

        if alias != iface && !self.links.exists(&alias).await {
            let created = self.create_ap_interface(iface, &alias, cancel).await?;
            report.record("create access point interface", created);
        }

        report.check("start access point", self.access_point().start().await);

        report.mode = Some(Mode::AccessPoint);
        Ok(report)
    }

    /// Cycle `iface` around a supplicant start, waiting for the link to settle
    async fn restart_supplicant(
        &self,
        iface: &str,
        report: &mut TransitionReport,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let links = &self.links;
        let timing = &self.config.timing;

        report.check("set link down", links.down(iface).await.map(|()| true));

        let down = poll_until(
            move || async move { !links.is_up(iface).await },
            timing.poll_interval,
            timing.link_settle_timeout,
            cancel,
        )
        .await?;
        report.record("wait for link down", down);

        report.check("start wpa_supplicant", self.wpa().start().await);
        report.check("set link up", links.up(iface).await.map(|()| true));

        let up = poll_until(
            move || async move { links.is_up(iface).await },
            timing.poll_interval,
            timing.link_settle_timeout,
            cancel,
        )
        .await?;
        report.record("wait for link up", up);

        Ok(())
    }

    async fn create_ap_interface(
        &self,
        iface: &str,
        alias: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if let Err(e) = self.links.add_ap_interface(iface, alias).await {
            warn!("failed to add {alias} on {iface}: {e:#}");
            return Ok(false);
        }

        let links = &self.links;
        poll_until(
            move || async move { links.exists(alias).await },
            self.config.timing.poll_interval,
            self.config.timing.link_settle_timeout,
            cancel,
        )
        .await
    }

    /// Wait for the supplicant to know `ssid`, then prefer it over the others
    async fn select_network(
        &self,
        iface: &str,
        ssid: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let listed = poll_until(
            move || async move { self.network_id(iface, ssid).await.is_some() },
            self.config.timing.poll_interval,
            self.config.timing.link_settle_timeout,
            cancel,
        )
        .await?;

        let id = match listed {
            true => self.network_id(iface, ssid).await,
            false => None,
        };
        let Some(id) = id else {
            warn!("wpa_supplicant does not list {ssid}");
            return Ok(false);
        };

        let id = id.to_string();
        let output = execute_checked(
            &self.executor,
            CommandLine::new("wpa_cli", ["-i", iface, "select_network", id.as_str()]),
        )
        .await
        .context("failed to select network")?;

        Ok(output.stdout.trim() == "OK")
    }

    async fn network_id(&self, iface: &str, ssid: &str) -> Option<u32> {
        let command = CommandLine::new("wpa_cli", ["-i", iface, "list_networks"]);

        match execute_checked(&self.executor, command).await {
            Ok(output) => parse_network_list(&output.stdout)
                .into_iter()
                .find(|n| n.ssid == ssid)
                .map(|n| n.id),
            Err(e) => {
                debug!("failed to list networks: {e:#}");
                None
            }
        }
    }

    /// Returns the country the access point is configured with
    fn validate_access_point(&self, request: &AccessPointRequest) -> Result<String> {
        request
            .validate()
            .map_err(|e| NetworkError::validation(format!("access point: {e}")))?;

        if !is_valid_psk(&request.psk) {
            return Err(NetworkError::validation(
                "access point psk must be 8 to 63 printable ASCII characters or 64 hex digits",
            )
            .into());
        }

        let ip = request.ip;
        if ip.is_unspecified() || ip.is_broadcast() || ip.is_loopback() {
            return Err(NetworkError::validation(format!(
                "{ip} cannot be the access point address"
            ))
            .into());
        }

        let country = match &request.country {
            Some(country) => country.trim().to_ascii_uppercase(),
            None => self.wpa().country()?.ok_or_else(|| {
                NetworkError::validation("country must be given or configured for the station")
            })?,
        };

        if !is_country_code(&country) {
            return Err(NetworkError::validation(format!(
                "country must be an ISO 3166 alpha-2 code, got '{country}'"
            ))
            .into());
        }

        Ok(country)
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(NetworkError::Cancelled.into());
    }
    Ok(())
}
