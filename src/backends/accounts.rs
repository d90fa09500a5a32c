//! Accounts back-end: which systems the caller can actually reach.
//!
//! Each configured system is probed with a batch-mode ssh login; systems
//! that answer become account leaves.

use std::time::Duration;

use anyhow::Result;

use super::run_cli;
use crate::model::{ObjectClass, ProviderObject};
use crate::provider::ObjectSource;

const IDCARD_ICON: &str = "./resources/IDCard.png";

/// Outer bound for one probe; ssh gets a shorter connect timeout itself.
const PROBE_TIMEOUT: Duration = Duration::from_secs(7);

/// A named system with its ssh hostname.
#[derive(Debug, Clone)]
pub struct System {
    pub name: String,
    pub hostname: String,
}

impl System {
    /// Parse a `Name=hostname` CLI argument.
    pub fn parse(spec: &str) -> Option<Self> {
        let (name, hostname) = spec.split_once('=')?;
        let (name, hostname) = (name.trim(), hostname.trim());
        (!name.is_empty() && !hostname.is_empty()).then(|| Self {
            name: name.to_string(),
            hostname: hostname.to_string(),
        })
    }
}

pub struct AccountsSource {
    systems: Vec<System>,
}

impl AccountsSource {
    pub fn new(systems: Vec<System>) -> Self {
        Self { systems }
    }
}

impl ObjectSource for AccountsSource {
    fn root_objects(&self) -> Result<Vec<ProviderObject>> {
        let mut objects = Vec::new();
        for system in &self.systems {
            if !has_ssh_account(&system.hostname) {
                continue;
            }
            objects.push(
                ProviderObject::new(ObjectClass::Account, format!("/{}", system.name), &system.name)
                    .icon(IDCARD_ICON)
                    .extra("hostname", system.hostname.clone()),
            );
        }
        Ok(objects)
    }

    fn list_base(&self, _base: &str) -> Result<Vec<ProviderObject>> {
        // Accounts are leaves; any path resolves to the root listing.
        self.root_objects()
    }
}

/// True when a batch ssh (no password or host-key prompts) succeeds.
fn has_ssh_account(hostname: &str) -> bool {
    run_cli(
        "ssh",
        &[
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "ConnectTimeout=5",
            hostname,
            "true",
        ],
        PROBE_TIMEOUT,
    )
    .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_spec_parsing() {
        let system = System::parse("Quartz=quartz.example.edu").unwrap();
        assert_eq!(system.name, "Quartz");
        assert_eq!(system.hostname, "quartz.example.edu");

        assert!(System::parse("nohost").is_none());
        assert!(System::parse("=host").is_none());
        assert!(System::parse("Name=").is_none());
    }

    #[test]
    fn test_unreachable_systems_are_filtered() {
        // An empty hostname never probes successfully, so the listing is empty.
        let source = AccountsSource::new(vec![System {
            name: "Ghost".into(),
            hostname: "invalid.host.invalid".into(),
        }]);
        // ssh may be missing entirely in the test environment; either way the
        // probe must fail closed.
        assert!(source.root_objects().unwrap().is_empty());
    }
}
