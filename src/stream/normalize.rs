//! Request normalizer: query parameters into a receiver descriptor.
//!
//! # Responsibilities
//! - Map recognized query fields onto descriptor attributes
//! - First occurrence of each recognized field wins
//! - Remap legacy field names, stash everything else in SystemInfo
//! - Apply defaults once all parameters have been seen

use crate::config::AdmissionConfig;
use crate::stream::capabilities::{capabilities_for_version, OLDEST_VERSION};
use crate::stream::descriptor::ReceiverDescriptor;

/// Fields an old child may still send, remapped to their current names
/// before landing in the SystemInfo bag.
const LEGACY_ALIASES: &[(&str, &str)] = &[
    ("STREAM_SYSTEM_OS_NAME", "STREAM_HOST_OS_NAME"),
    ("STREAM_SYSTEM_OS_ID", "STREAM_HOST_OS_ID"),
    ("STREAM_SYSTEM_OS_ID_LIKE", "STREAM_HOST_OS_ID_LIKE"),
    ("STREAM_SYSTEM_OS_VERSION", "STREAM_HOST_OS_VERSION"),
    ("STREAM_SYSTEM_OS_VERSION_ID", "STREAM_HOST_OS_VERSION_ID"),
    ("STREAM_SYSTEM_OS_DETECTION", "STREAM_HOST_OS_DETECTION"),
];

/// Old children declare this instead of `ver`; it maps to protocol
/// version 1.
const LEGACY_VERSION_FIELD: &str = "STREAM_PROTOCOL_VERSION";

/// Populate a descriptor from the decoded query parameters.
///
/// Values arrive already percent-decoded from the front-end. Empty names
/// or values are skipped, matching the wire behavior of old children that
/// send dangling separators.
pub fn apply_params<'a, I>(rpt: &mut ReceiverDescriptor, params: I)
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    for (name, value) in params {
        if name.is_empty() || value.is_empty() {
            continue;
        }

        match name {
            "key" => {
                if rpt.key.is_none() {
                    rpt.key = Some(value.to_string());
                }
            }
            "hostname" => {
                if rpt.hostname.is_none() {
                    rpt.hostname = Some(value.to_string());
                }
            }
            "registry_hostname" => {
                if rpt.registry_hostname.is_none() {
                    rpt.registry_hostname = Some(value.to_string());
                }
            }
            "machine_guid" => {
                if rpt.machine_guid.is_none() {
                    rpt.machine_guid = Some(value.to_string());
                }
            }
            "update_every" => {
                if rpt.update_every.is_none() {
                    rpt.update_every = value.parse().ok();
                }
            }
            "os" => {
                if rpt.os.is_none() {
                    rpt.os = Some(value.to_string());
                }
            }
            "timezone" => {
                if rpt.timezone.is_none() {
                    rpt.timezone = Some(value.to_string());
                }
            }
            "abbrev_timezone" => {
                if rpt.abbrev_timezone.is_none() {
                    rpt.abbrev_timezone = Some(value.to_string());
                }
            }
            "utc_offset" => {
                if rpt.utc_offset.is_none() {
                    rpt.utc_offset = value.parse().ok();
                }
            }
            "hops" => {
                if rpt.hops.is_none() {
                    rpt.hops = value.parse().ok();
                }
            }
            "ml_capable" => {
                if let Some(info) = rpt.system_info.as_mut() {
                    if info.ml_capable.is_none() {
                        info.ml_capable = value.parse().ok();
                    }
                }
            }
            "ml_enabled" => {
                if let Some(info) = rpt.system_info.as_mut() {
                    if info.ml_enabled.is_none() {
                        info.ml_enabled = value.parse().ok();
                    }
                }
            }
            "mc_version" => {
                if let Some(info) = rpt.system_info.as_mut() {
                    if info.mc_version.is_none() {
                        info.mc_version = value.parse().ok();
                    }
                }
            }
            "ver" => {
                if rpt.capabilities.is_none() {
                    if let Ok(version) = value.parse::<u32>() {
                        rpt.capabilities = Some(capabilities_for_version(version));
                    }
                }
            }
            other => {
                let mut name = other;
                for (legacy, current) in LEGACY_ALIASES {
                    if name == *legacy {
                        name = current;
                        break;
                    }
                }

                if name == LEGACY_VERSION_FIELD && rpt.capabilities.is_none() {
                    rpt.capabilities = Some(capabilities_for_version(1));
                }

                if let Some(info) = rpt.system_info.as_mut() {
                    info.set(name, value);
                }
            }
        }
    }
}

/// Apply the defaults that depend on the full parameter set having been
/// seen.
pub fn finalize(rpt: &mut ReceiverDescriptor, config: &AdmissionConfig) {
    if rpt.registry_hostname.is_none() {
        rpt.registry_hostname = rpt.hostname.clone();
    }

    if rpt.capabilities.is_none() {
        rpt.capabilities = Some(capabilities_for_version(OLDEST_VERSION));
    }

    if rpt.update_every.is_none() {
        rpt.update_every = Some(config.default_update_every);
    }

    let hops = rpt.hops.unwrap_or(1);
    rpt.hops = Some(hops);
    if let Some(info) = rpt.system_info.as_mut() {
        info.hops = hops;
    }
}

/// Split the client-identification string into program name and version
/// at the first '/'. Absent or empty parts leave the fields unset.
pub fn apply_user_agent(rpt: &mut ReceiverDescriptor, user_agent: Option<&str>) {
    let Some(ua) = user_agent.filter(|ua| !ua.is_empty()) else {
        return;
    };

    match ua.split_once('/') {
        Some((name, version)) => {
            if !name.is_empty() {
                rpt.program_name = Some(name.to_string());
            }
            if !version.is_empty() {
                rpt.program_version = Some(version.to_string());
            }
        }
        None => {
            rpt.program_name = Some(ua.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::capabilities::{Capabilities, NEWEST_VERSION};

    fn descriptor() -> ReceiverDescriptor {
        ReceiverDescriptor::new("127.0.0.1:9000".parse().unwrap())
    }

    fn params(pairs: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
        pairs.to_vec()
    }

    #[test]
    fn test_recognized_fields_map_to_descriptor() {
        let mut rpt = descriptor();
        apply_params(
            &mut rpt,
            params(&[
                ("key", "11111111-2222-3333-4444-555555555555"),
                ("hostname", "alpha"),
                ("machine_guid", "99999999-8888-7777-6666-555555555555"),
                ("update_every", "2"),
                ("os", "linux"),
                ("timezone", "Europe/Athens"),
                ("utc_offset", "7200"),
                ("hops", "2"),
                ("ver", "4"),
            ]),
        );
        finalize(&mut rpt, &AdmissionConfig::default());

        assert_eq!(rpt.hostname.as_deref(), Some("alpha"));
        assert_eq!(rpt.update_every, Some(2));
        assert_eq!(rpt.utc_offset, Some(7200));
        assert_eq!(rpt.hops, Some(2));
        assert_eq!(rpt.capabilities, Some(capabilities_for_version(4)));
    }

    #[test]
    fn test_first_occurrence_wins() {
        let mut rpt = descriptor();
        apply_params(
            &mut rpt,
            params(&[("hostname", "alpha"), ("hostname", "beta"), ("ver", "2"), ("ver", "5")]),
        );

        assert_eq!(rpt.hostname.as_deref(), Some("alpha"));
        assert_eq!(rpt.capabilities, Some(capabilities_for_version(2)));
    }

    #[test]
    fn test_registry_hostname_defaults_to_hostname() {
        let mut rpt = descriptor();
        apply_params(&mut rpt, params(&[("hostname", "alpha")]));
        finalize(&mut rpt, &AdmissionConfig::default());

        assert_eq!(rpt.registry_hostname.as_deref(), Some("alpha"));
    }

    #[test]
    fn test_missing_version_defaults_to_oldest() {
        let mut rpt = descriptor();
        apply_params(&mut rpt, params(&[("hostname", "alpha")]));
        finalize(&mut rpt, &AdmissionConfig::default());

        let caps = rpt.capabilities.unwrap();
        assert!(caps.contains(Capabilities::V1));
        assert!(!caps.contains(Capabilities::V2));
    }

    #[test]
    fn test_legacy_alias_remap() {
        let mut rpt = descriptor();
        apply_params(
            &mut rpt,
            params(&[
                ("STREAM_SYSTEM_OS_NAME", "Debian"),
                ("STREAM_SYSTEM_OS_ID", "debian"),
                ("STREAM_SYSTEM_OS_ID_LIKE", "debian"),
                ("STREAM_SYSTEM_OS_VERSION", "12 (bookworm)"),
                ("STREAM_SYSTEM_OS_VERSION_ID", "12"),
                ("STREAM_SYSTEM_OS_DETECTION", "/etc/os-release"),
            ]),
        );

        let info = rpt.system_info.as_ref().unwrap();
        assert_eq!(info.get("STREAM_HOST_OS_NAME"), Some("Debian"));
        assert_eq!(info.get("STREAM_HOST_OS_ID"), Some("debian"));
        assert_eq!(info.get("STREAM_HOST_OS_ID_LIKE"), Some("debian"));
        assert_eq!(info.get("STREAM_HOST_OS_VERSION"), Some("12 (bookworm)"));
        assert_eq!(info.get("STREAM_HOST_OS_VERSION_ID"), Some("12"));
        assert_eq!(info.get("STREAM_HOST_OS_DETECTION"), Some("/etc/os-release"));
        assert_eq!(info.get("STREAM_SYSTEM_OS_NAME"), None);
        assert_eq!(info.len(), 6);
    }

    #[test]
    fn test_legacy_version_field_forces_v1_negotiation() {
        let mut rpt = descriptor();
        apply_params(&mut rpt, params(&[(LEGACY_VERSION_FIELD, "1")]));

        assert_eq!(rpt.capabilities, Some(capabilities_for_version(1)));

        // an explicit `ver` seen earlier is not overridden
        let mut rpt = descriptor();
        apply_params(
            &mut rpt,
            params(&[("ver", "6"), (LEGACY_VERSION_FIELD, "1")]),
        );
        assert_eq!(rpt.capabilities, Some(capabilities_for_version(NEWEST_VERSION)));
    }

    #[test]
    fn test_unknown_fields_go_to_system_info() {
        let mut rpt = descriptor();
        apply_params(
            &mut rpt,
            params(&[("STREAM_HOST_IS_K8S_NODE", "false"), ("custom", "42")]),
        );

        let info = rpt.system_info.as_ref().unwrap();
        assert_eq!(info.get("STREAM_HOST_IS_K8S_NODE"), Some("false"));
        assert_eq!(info.get("custom"), Some("42"));
    }

    #[test]
    fn test_malformed_numeric_values_keep_defaults() {
        let mut rpt = descriptor();
        apply_params(
            &mut rpt,
            params(&[("update_every", "banana"), ("hops", "-x")]),
        );
        finalize(&mut rpt, &AdmissionConfig::default());

        assert_eq!(rpt.update_every, Some(1));
        assert_eq!(rpt.hops, Some(1));
    }

    #[test]
    fn test_user_agent_split() {
        let mut rpt = descriptor();
        apply_user_agent(&mut rpt, Some("child-agent/2.1.0"));
        assert_eq!(rpt.program_name.as_deref(), Some("child-agent"));
        assert_eq!(rpt.program_version.as_deref(), Some("2.1.0"));

        let mut rpt = descriptor();
        apply_user_agent(&mut rpt, Some("bare-name"));
        assert_eq!(rpt.program_name.as_deref(), Some("bare-name"));
        assert_eq!(rpt.program_version, None);

        let mut rpt = descriptor();
        apply_user_agent(&mut rpt, None);
        assert_eq!(rpt.program_name, None);
        assert_eq!(rpt.program_version, None);
    }
}
