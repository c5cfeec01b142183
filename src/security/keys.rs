//! Key policy store: API key and machine GUID policy lookups.
//!
//! # Responsibilities
//! - Classify an identifier as API key, machine GUID, or unknown
//! - Answer enablement queries with caller-supplied defaults
//! - Match the remote address against per-key IP allow-lists
//!
//! # Design Decisions
//! - The admission pipeline talks to a trait, not to the config, so tests
//!   can substitute policies freely
//! - API keys default to disabled (operators must opt in); machine GUIDs
//!   default to enabled (children do not need per-GUID config)

use std::collections::HashMap;
use std::net::IpAddr;

use uuid::Uuid;

use crate::config::KeyEntry;

/// Category of an identifier as recorded in policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Api,
    Machine,
    Unknown,
}

/// Per-key streaming settings applied after admission.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiverSettings {
    /// Mark the host as ephemeral (short-lived child, e.g. autoscaled VM).
    pub ephemeral: bool,
}

/// Policy queries the admission pipeline needs answered.
pub trait KeyPolicy: Send + Sync {
    /// The recorded category of this identifier.
    fn kind_of(&self, id: &Uuid) -> KeyKind;

    /// Whether the identifier is enabled. `default_if_unset` applies when
    /// policy does not say either way.
    fn is_enabled(&self, id: &Uuid, default_if_unset: bool) -> bool;

    /// Whether the remote address is allowed for this identifier.
    fn ip_allowed(&self, id: &Uuid, ip: IpAddr) -> bool;

    /// Streaming settings for an admitted (api key, machine GUID) pair.
    fn receiver_settings(&self, _api_key: &Uuid, _machine_guid: &Uuid) -> ReceiverSettings {
        ReceiverSettings::default()
    }
}

/// An ordered IP allow-list. Each pattern may use '*' wildcards; a '!'
/// prefix turns it into a deny entry. First matching entry decides; no
/// match denies.
#[derive(Debug, Clone, Default)]
pub struct IpAcl {
    patterns: Vec<(bool, String)>,
}

impl IpAcl {
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .map(|p| match p.strip_prefix('!') {
                Some(rest) => (false, rest.to_string()),
                None => (true, p.clone()),
            })
            .collect();
        Self { patterns }
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        let text = ip.to_string();
        for (allow, pattern) in &self.patterns {
            if wildcard_match(pattern, &text) {
                return *allow;
            }
        }
        false
    }
}

/// Glob-style match: '*' matches any run of characters.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0usize, 0usize);
    let (mut star, mut mark) = (None, 0usize);

    while ti < t.len() {
        if pi < p.len() && (p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

struct PolicyEntry {
    kind: KeyKind,
    enabled: Option<bool>,
    acl: IpAcl,
    ephemeral: bool,
}

/// Config-file-backed key policy.
pub struct ConfigKeyPolicy {
    entries: HashMap<Uuid, PolicyEntry>,
}

impl ConfigKeyPolicy {
    /// Build from validated config entries. Entries with malformed ids or
    /// unknown kinds are skipped (validation reports them upfront).
    pub fn from_entries(entries: &[KeyEntry]) -> Self {
        let mut map = HashMap::new();
        for entry in entries {
            let Ok(id) = Uuid::parse_str(&entry.id) else {
                continue;
            };
            let kind = match entry.kind.as_str() {
                "api" => KeyKind::Api,
                "machine" => KeyKind::Machine,
                _ => continue,
            };
            map.insert(
                id,
                PolicyEntry {
                    kind,
                    enabled: entry.enabled,
                    acl: IpAcl::new(&entry.allow_from),
                    ephemeral: entry.ephemeral,
                },
            );
        }
        Self { entries: map }
    }
}

impl KeyPolicy for ConfigKeyPolicy {
    fn kind_of(&self, id: &Uuid) -> KeyKind {
        self.entries.get(id).map_or(KeyKind::Unknown, |e| e.kind)
    }

    fn is_enabled(&self, id: &Uuid, default_if_unset: bool) -> bool {
        self.entries
            .get(id)
            .and_then(|e| e.enabled)
            .unwrap_or(default_if_unset)
    }

    fn ip_allowed(&self, id: &Uuid, ip: IpAddr) -> bool {
        match self.entries.get(id) {
            Some(entry) => entry.acl.allows(ip),
            // No entry means no restriction was configured.
            None => true,
        }
    }

    fn receiver_settings(&self, api_key: &Uuid, machine_guid: &Uuid) -> ReceiverSettings {
        let ephemeral = self
            .entries
            .get(machine_guid)
            .or_else(|| self.entries.get(api_key))
            .map(|e| e.ephemeral)
            .unwrap_or(false);
        ReceiverSettings { ephemeral }
    }
}
