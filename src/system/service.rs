use super::command::{CommandExecutor, CommandLine};
use log::{debug, warn};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use trait_variant::make;

/// Control of the system service manager.
///
/// Every call reports success as a flag. Failures are logged, not raised.
#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait ServiceController {
    async fn is_active(&self, name: &str) -> bool;
    async fn is_enabled(&self, name: &str) -> bool;
    async fn start(&self, name: &str) -> bool;
    async fn stop(&self, name: &str) -> bool;
    async fn enable(&self, name: &str) -> bool;
    async fn disable(&self, name: &str) -> bool;
    async fn mask(&self, name: &str) -> bool;
    async fn unmask(&self, name: &str) -> bool;
    async fn restart(&self, name: &str) -> bool;
}

/// `ServiceController` backed by `systemctl`
pub struct Systemctl<C> {
    executor: C,
}

impl<C> Systemctl<C>
where
    C: CommandExecutor + Sync,
{
    pub fn new(executor: C) -> Self {
        Self { executor }
    }

    async fn run(&self, args: &[&str]) -> bool {
        let command = CommandLine::new("systemctl", args.iter().copied());

        match self.executor.execute(command.clone()).await {
            Ok(output) if output.is_success() => true,
            Ok(output) => {
                debug!(
                    "'{command}' exited with {:?}: {}",
                    output.exit_code,
                    output.stderr.trim()
                );
                false
            }
            Err(e) => {
                warn!("failed to run '{command}': {e:#}");
                false
            }
        }
    }

    /// A failing query just means "no", a failing action is worth a warning.
    async fn act(&self, verb: &str, name: &str) -> bool {
        let ok = self.run(&[verb, name]).await;
        if !ok {
            warn!("systemctl {verb} {name} failed");
        }
        ok
    }
}

impl<C> ServiceController for Systemctl<C>
where
    C: CommandExecutor + Sync,
{
    async fn is_active(&self, name: &str) -> bool {
        self.run(&["is-active", "-q", name]).await
    }

    async fn is_enabled(&self, name: &str) -> bool {
        self.run(&["is-enabled", "-q", name]).await
    }

    async fn start(&self, name: &str) -> bool {
        self.act("start", name).await
    }

    async fn stop(&self, name: &str) -> bool {
        self.act("stop", name).await
    }

    async fn enable(&self, name: &str) -> bool {
        self.act("enable", name).await
    }

    async fn disable(&self, name: &str) -> bool {
        self.act("disable", name).await
    }

    async fn mask(&self, name: &str) -> bool {
        self.act("mask", name).await
    }

    async fn unmask(&self, name: &str) -> bool {
        self.act("unmask", name).await
    }

    async fn restart(&self, name: &str) -> bool {
        self.act("restart", name).await
    }
}
