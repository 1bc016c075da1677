use super::{
    command::{CommandExecutor, CommandLine, execute_checked},
    parsers::parse_link_state,
};
use anyhow::Result;
use log::{debug, info};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use trait_variant::make;

/// Administrative state of network links
#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait LinkController {
    async fn up(&self, iface: &str) -> Result<()>;
    async fn down(&self, iface: &str) -> Result<()>;
    async fn is_up(&self, iface: &str) -> bool;
    async fn exists(&self, iface: &str) -> bool;
    /// Create the access point interface `alias` on the wifi device `physical`
    async fn add_ap_interface(&self, physical: &str, alias: &str) -> Result<()>;
    /// Release the soft RF kill switch of all wifi devices
    async fn unblock_wifi(&self) -> Result<()>;
}

/// `LinkController` backed by `ip` and `rfkill`
pub struct IpLink<C> {
    executor: C,
}

impl<C> IpLink<C>
where
    C: CommandExecutor + Sync,
{
    pub fn new(executor: C) -> Self {
        Self { executor }
    }

    async fn set(&self, iface: &str, state: &str) -> Result<()> {
        info!("set link {iface} {state}");

        execute_checked(
            &self.executor,
            CommandLine::new("ip", ["link", "set", iface, state]),
        )
        .await?;

        Ok(())
    }
}

impl<C> LinkController for IpLink<C>
where
    C: CommandExecutor + Sync,
{
    async fn up(&self, iface: &str) -> Result<()> {
        self.set(iface, "up").await
    }

    async fn down(&self, iface: &str) -> Result<()> {
        self.set(iface, "down").await
    }

    async fn is_up(&self, iface: &str) -> bool {
        let command = CommandLine::new("ip", ["-o", "link", "show", iface]);

        match execute_checked(&self.executor, command).await {
            Ok(output) => parse_link_state(&output.stdout).is_some_and(|link| link.is_up()),
            Err(e) => {
                debug!("link {iface} unavailable: {e:#}");
                false
            }
        }
    }

    async fn exists(&self, iface: &str) -> bool {
        let command = CommandLine::new("ip", ["-o", "link", "show", iface]);

        execute_checked(&self.executor, command)
            .await
            .is_ok_and(|output| parse_link_state(&output.stdout).is_some())
    }

    async fn add_ap_interface(&self, physical: &str, alias: &str) -> Result<()> {
        info!("add access point interface {alias} on {physical}");

        execute_checked(
            &self.executor,
            CommandLine::new("iw", ["dev", physical, "interface", "add", alias, "type", "__ap"]),
        )
        .await?;

        Ok(())
    }

    async fn unblock_wifi(&self) -> Result<()> {
        execute_checked(
            &self.executor,
            CommandLine::new("rfkill", ["unblock", "wifi"]),
        )
        .await?;

        Ok(())
    }
}
