//! Platform facts consumed by provider confinement.
//!
//! Facts are a read-only key/value view of the host. The full fact-gathering
//! system lives elsewhere; this module only detects the handful of facts the
//! built-in providers confine on, and lets callers override any of them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;

/// Fact naming the kernel (`Linux`, `Darwin`, `FreeBSD`, `windows`)
pub const KERNEL: &str = "kernel";

/// Fact naming the operating system distribution (`Debian`, `FreeBSD`, ...)
pub const OPERATING_SYSTEM: &str = "operatingsystem";

/// Fact naming the OS family (`Debian`, `RedHat`, `Darwin`, ...)
pub const OS_FAMILY: &str = "osfamily";

/// Fact naming the CPU architecture
pub const ARCHITECTURE: &str = "architecture";

/// A read-only set of platform facts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Facts {
    values: BTreeMap<String, String>,
}

impl Facts {
    /// Create an empty fact set
    pub fn new() -> Self {
        Self::default()
    }

    /// Detect facts about the current host
    pub fn from_host() -> Self {
        let kernel = match std::env::consts::OS {
            "linux" => "Linux",
            "macos" => "Darwin",
            "freebsd" => "FreeBSD",
            "openbsd" => "OpenBSD",
            "netbsd" => "NetBSD",
            other => other,
        };

        let os_release = fs::read_to_string("/etc/os-release").ok();
        let operatingsystem = os_release
            .as_deref()
            .and_then(|content| os_release_field(content, "ID"))
            .map(|id| capitalize_distro(&id))
            .unwrap_or_else(|| kernel.to_string());

        let family = os_family(&operatingsystem).unwrap_or(kernel).to_string();

        log::debug!(
            "Detected facts: kernel={} operatingsystem={} osfamily={}",
            kernel,
            operatingsystem,
            family
        );

        Self::new()
            .with(KERNEL, kernel)
            .with(OPERATING_SYSTEM, &operatingsystem)
            .with(OS_FAMILY, &family)
            .with(ARCHITECTURE, std::env::consts::ARCH)
    }

    /// Set a fact, returning the updated set
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.set(name, value);
        self
    }

    /// Set a fact in place
    pub fn set(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_lowercase(), value.to_string());
    }

    /// Look up a fact by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Merge overrides on top of this set
    pub fn merge(&mut self, overrides: &BTreeMap<String, String>) {
        for (name, value) in overrides {
            self.set(name, value);
        }
    }

    /// Iterate over all facts in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn os_release_field(content: &str, key: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k.trim() == key).then(|| v.trim().trim_matches('"').to_string())
    })
}

fn capitalize_distro(id: &str) -> String {
    match id {
        "centos" => "CentOS".to_string(),
        "rhel" => "RedHat".to_string(),
        "opensuse" | "opensuse-leap" => "OpenSuSE".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}

fn os_family(operatingsystem: &str) -> Option<&'static str> {
    match operatingsystem {
        "Debian" | "Ubuntu" => Some("Debian"),
        "Fedora" | "CentOS" | "RedHat" => Some("RedHat"),
        "Arch" => Some("Archlinux"),
        "FreeBSD" => Some("FreeBSD"),
        "Darwin" => Some("Darwin"),
        _ => None,
    }
}
