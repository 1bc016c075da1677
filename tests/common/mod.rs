// Recording stand-ins for the system collaborators, shared by the integration tests
#![allow(dead_code)]

use anyhow::{Result, bail};
use netmode::{
    config::AppConfig,
    services::mode::ModeOrchestrator,
    system::{
        CommandExecutor, CommandLine, CommandOutput, LinkController, LocalFileSystem,
        ServiceController,
    },
};
use std::{
    collections::HashSet,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};
use tempfile::TempDir;

/// Everything the fakes were asked to do, in call order
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Entries that changed something, queries left out
    pub fn actions(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| !e.starts_with("is-") && !e.starts_with("exists") && !e.starts_with("show"))
            .collect()
    }
}

/// Services that start, stop, enable and disable as told
pub struct FakeServices {
    journal: Journal,
    active: Mutex<HashSet<String>>,
    enabled: Mutex<HashSet<String>>,
    failing: HashSet<String>,
}

impl FakeServices {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            active: Mutex::default(),
            enabled: Mutex::default(),
            failing: HashSet::new(),
        }
    }

    pub fn running(self, names: &[&str]) -> Self {
        for name in names {
            self.active.lock().unwrap().insert(name.to_string());
            self.enabled.lock().unwrap().insert(name.to_string());
        }
        self
    }

    /// Every action on `name` fails
    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    fn act(&self, verb: &str, name: &str) -> bool {
        self.journal.push(format!("{verb} {name}"));
        !self.failing.contains(name)
    }
}

impl ServiceController for FakeServices {
    async fn is_active(&self, name: &str) -> bool {
        self.journal.push(format!("is-active {name}"));
        self.active.lock().unwrap().contains(name)
    }

    async fn is_enabled(&self, name: &str) -> bool {
        self.journal.push(format!("is-enabled {name}"));
        self.enabled.lock().unwrap().contains(name)
    }

    async fn start(&self, name: &str) -> bool {
        let ok = self.act("start", name);
        if ok {
            self.active.lock().unwrap().insert(name.to_string());
        }
        ok
    }

    async fn stop(&self, name: &str) -> bool {
        let ok = self.act("stop", name);
        if ok {
            self.active.lock().unwrap().remove(name);
        }
        ok
    }

    async fn enable(&self, name: &str) -> bool {
        let ok = self.act("enable", name);
        if ok {
            self.enabled.lock().unwrap().insert(name.to_string());
        }
        ok
    }

    async fn disable(&self, name: &str) -> bool {
        let ok = self.act("disable", name);
        if ok {
            self.enabled.lock().unwrap().remove(name);
        }
        ok
    }

    async fn mask(&self, name: &str) -> bool {
        self.act("mask", name)
    }

    async fn unmask(&self, name: &str) -> bool {
        self.act("unmask", name)
    }

    async fn restart(&self, name: &str) -> bool {
        let ok = self.act("restart", name);
        if ok {
            self.active.lock().unwrap().insert(name.to_string());
        }
        ok
    }
}

/// Links whose state follows `up` and `down`
pub struct FakeLinks {
    journal: Journal,
    up: Mutex<HashSet<String>>,
    existing: Mutex<HashSet<String>>,
    /// Links that ignore `down`
    stuck: HashSet<String>,
}

impl FakeLinks {
    pub fn new(journal: &Journal, existing: &[&str]) -> Self {
        Self {
            journal: journal.clone(),
            up: Mutex::default(),
            existing: Mutex::new(existing.iter().map(|s| s.to_string()).collect()),
            stuck: HashSet::new(),
        }
    }

    pub fn up(self, iface: &str) -> Self {
        self.up.lock().unwrap().insert(iface.to_string());
        self
    }

    pub fn stuck(mut self, iface: &str) -> Self {
        self.stuck.insert(iface.to_string());
        self
    }
}

impl LinkController for FakeLinks {
    async fn up(&self, iface: &str) -> Result<()> {
        self.journal.push(format!("link up {iface}"));
        if !self.existing.lock().unwrap().contains(iface) {
            bail!("Cannot find device \"{iface}\"");
        }
        self.up.lock().unwrap().insert(iface.to_string());
        Ok(())
    }

    async fn down(&self, iface: &str) -> Result<()> {
        self.journal.push(format!("link down {iface}"));
        if !self.stuck.contains(iface) {
            self.up.lock().unwrap().remove(iface);
        }
        Ok(())
    }

    async fn is_up(&self, iface: &str) -> bool {
        self.journal.push(format!("show {iface}"));
        self.up.lock().unwrap().contains(iface)
    }

    async fn exists(&self, iface: &str) -> bool {
        self.journal.push(format!("exists {iface}"));
        self.existing.lock().unwrap().contains(iface)
    }

    async fn add_ap_interface(&self, physical: &str, alias: &str) -> Result<()> {
        self.journal.push(format!("add {alias} on {physical}"));
        self.existing.lock().unwrap().insert(alias.to_string());
        Ok(())
    }

    async fn unblock_wifi(&self) -> Result<()> {
        self.journal.push("unblock wifi");
        Ok(())
    }
}

/// Commands exit with 0 and print nothing unless a canned reply matches
pub struct FakeExecutor {
    journal: Journal,
    replies: Vec<(String, CommandOutput)>,
}

impl FakeExecutor {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            replies: vec![],
        }
    }

    pub fn reply(mut self, command: &str, output: CommandOutput) -> Self {
        self.replies.push((command.to_string(), output));
        self
    }
}

impl CommandExecutor for FakeExecutor {
    async fn execute(&self, command: CommandLine) -> Result<CommandOutput> {
        let line = command.to_string();
        self.journal.push(format!("exec {line}"));

        Ok(self
            .replies
            .iter()
            .find(|(c, _)| *c == line)
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput::success("")))
    }
}

pub type Orchestrator = ModeOrchestrator<FakeExecutor, FakeServices, FakeLinks, LocalFileSystem>;

/// Configuration with every file inside a fresh temporary directory
pub struct Sandbox {
    pub dir: TempDir,
    pub config: AppConfig,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mut config = AppConfig::default();
        config.paths.dhcpcd_conf = dir.path().join("dhcpcd.conf");
        config.paths.wpa_supplicant_conf = dir.path().join("wpa_supplicant/wpa_supplicant.conf");
        config.paths.hostapd_conf = dir.path().join("hostapd/hostapd.conf");
        config.paths.dnsmasq_conf = dir.path().join("dnsmasq.conf");
        config.timing.poll_interval = Duration::from_millis(50);
        config.timing.link_settle_timeout = Duration::from_secs(2);

        Self { dir, config }
    }

    pub fn orchestrator(
        &self,
        executor: FakeExecutor,
        services: FakeServices,
        links: FakeLinks,
    ) -> Orchestrator {
        ModeOrchestrator::new(executor, services, links, LocalFileSystem, self.config.clone())
    }

    pub fn seed(&self, path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create parent dir");
        }
        std::fs::write(path, content).expect("failed to seed file");
    }

    pub fn read(&self, path: &Path) -> String {
        std::fs::read_to_string(path).expect("file should exist")
    }
}
