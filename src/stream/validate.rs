//! Credential validation for inbound streams.
//!
//! # Responsibilities
//! - Run the ordered credential checks against the key policy
//! - Record the parsed identities on the descriptor for later stages
//!
//! Checks run in a fixed order and stop at the first failure, so the
//! logged status always names the earliest problem. The peer still only
//! ever sees the generic denial reply.

use std::net::IpAddr;

use uuid::Uuid;

use crate::security::{KeyKind, KeyPolicy};
use crate::stream::descriptor::ReceiverDescriptor;
use crate::stream::status::StreamStatus;

/// Validate the declared credentials against policy.
///
/// On success the parsed key and machine GUID are stored on the
/// descriptor. On failure the descriptor is left untouched beyond
/// whatever was already parsed.
pub fn check_access(
    rpt: &mut ReceiverDescriptor,
    policy: &dyn KeyPolicy,
    ip: IpAddr,
) -> Result<(), StreamStatus> {
    let key = match rpt.key.as_deref() {
        Some(key) if !key.is_empty() => key,
        _ => return Err(StreamStatus::NoApiKey),
    };

    if rpt.hostname.as_deref().map_or(true, str::is_empty) {
        return Err(StreamStatus::NoHostname);
    }

    let machine_guid = match rpt.machine_guid.as_deref() {
        Some(guid) if !guid.is_empty() => guid,
        _ => return Err(StreamStatus::NoMachineGuid),
    };

    let key_uuid = Uuid::parse_str(key).map_err(|_| StreamStatus::InvalidApiKey)?;
    let machine_uuid =
        Uuid::parse_str(machine_guid).map_err(|_| StreamStatus::InvalidMachineGuid)?;

    // The declared API key must not be a machine GUID someone captured
    // from another node's logs.
    if policy.kind_of(&key_uuid) == KeyKind::Machine {
        return Err(StreamStatus::InvalidApiKey);
    }

    // API keys default to disabled: operators opt keys in explicitly.
    if !policy.is_enabled(&key_uuid, false) {
        return Err(StreamStatus::ApiKeyDisabled);
    }

    if !policy.ip_allowed(&key_uuid, ip) {
        return Err(StreamStatus::IpNotAllowed);
    }

    // And the declared machine GUID must not be an API key.
    if policy.kind_of(&machine_uuid) == KeyKind::Api {
        return Err(StreamStatus::InvalidMachineGuid);
    }

    // Machine GUIDs default to enabled: denying one is an explicit act.
    if !policy.is_enabled(&machine_uuid, true) {
        return Err(StreamStatus::MachineGuidDisabled);
    }

    if !policy.ip_allowed(&machine_uuid, ip) {
        return Err(StreamStatus::IpNotAllowed);
    }

    rpt.key_uuid = Some(key_uuid);
    rpt.machine_uuid = Some(machine_uuid);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyEntry;
    use crate::security::ConfigKeyPolicy;

    const API: &str = "11111111-2222-3333-4444-555555555555";
    const MACHINE: &str = "99999999-8888-7777-6666-555555555555";
    const IP: &str = "10.0.0.7";

    fn policy() -> ConfigKeyPolicy {
        ConfigKeyPolicy::from_entries(&[
            KeyEntry {
                id: API.into(),
                kind: "api".into(),
                enabled: Some(true),
                allow_from: vec!["10.0.*".into()],
                ephemeral: false,
            },
            KeyEntry {
                id: MACHINE.into(),
                kind: "machine".into(),
                enabled: None,
                allow_from: vec!["*".into()],
                ephemeral: false,
            },
        ])
    }

    fn descriptor(key: Option<&str>, hostname: Option<&str>, guid: Option<&str>) -> ReceiverDescriptor {
        let mut rpt = ReceiverDescriptor::new("10.0.0.7:4242".parse().unwrap());
        rpt.key = key.map(String::from);
        rpt.hostname = hostname.map(String::from);
        rpt.machine_guid = guid.map(String::from);
        rpt
    }

    fn check(rpt: &mut ReceiverDescriptor) -> Result<(), StreamStatus> {
        check_access(rpt, &policy(), IP.parse().unwrap())
    }

    #[test]
    fn test_valid_credentials_pass_and_record_identities() {
        let mut rpt = descriptor(Some(API), Some("alpha"), Some(MACHINE));
        assert_eq!(check(&mut rpt), Ok(()));
        assert_eq!(rpt.key_uuid, Some(Uuid::parse_str(API).unwrap()));
        assert_eq!(rpt.machine_uuid, Some(Uuid::parse_str(MACHINE).unwrap()));
    }

    #[test]
    fn test_missing_fields_fail_in_order() {
        let mut rpt = descriptor(None, Some("alpha"), Some(MACHINE));
        assert_eq!(check(&mut rpt), Err(StreamStatus::NoApiKey));

        let mut rpt = descriptor(Some(API), None, Some(MACHINE));
        assert_eq!(check(&mut rpt), Err(StreamStatus::NoHostname));

        let mut rpt = descriptor(Some(API), Some("alpha"), None);
        assert_eq!(check(&mut rpt), Err(StreamStatus::NoMachineGuid));

        // missing key reported before missing hostname
        let mut rpt = descriptor(None, None, None);
        assert_eq!(check(&mut rpt), Err(StreamStatus::NoApiKey));
    }

    #[test]
    fn test_malformed_uuids_rejected() {
        let mut rpt = descriptor(Some("not-a-uuid"), Some("alpha"), Some(MACHINE));
        assert_eq!(check(&mut rpt), Err(StreamStatus::InvalidApiKey));

        let mut rpt = descriptor(Some(API), Some("alpha"), Some("not-a-uuid"));
        assert_eq!(check(&mut rpt), Err(StreamStatus::InvalidMachineGuid));
    }

    #[test]
    fn test_swapped_key_and_guid_rejected() {
        // a machine GUID presented as the api key
        let mut rpt = descriptor(Some(MACHINE), Some("alpha"), Some(API));
        assert_eq!(check(&mut rpt), Err(StreamStatus::InvalidApiKey));

        // an api key presented as the machine GUID
        let mut rpt = descriptor(Some(API), Some("alpha"), Some(API));
        assert_eq!(check(&mut rpt), Err(StreamStatus::InvalidMachineGuid));
    }

    #[test]
    fn test_disabled_key_rejected() {
        let policy = ConfigKeyPolicy::from_entries(&[KeyEntry {
            id: API.into(),
            kind: "api".into(),
            enabled: Some(false),
            allow_from: vec!["*".into()],
            ephemeral: false,
        }]);
        let mut rpt = descriptor(Some(API), Some("alpha"), Some(MACHINE));
        assert_eq!(
            check_access(&mut rpt, &policy, IP.parse().unwrap()),
            Err(StreamStatus::ApiKeyDisabled)
        );
    }

    #[test]
    fn test_unknown_api_key_defaults_disabled() {
        let mut rpt = descriptor(
            Some("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee"),
            Some("alpha"),
            Some(MACHINE),
        );
        assert_eq!(check(&mut rpt), Err(StreamStatus::ApiKeyDisabled));
    }

    #[test]
    fn test_ip_restriction_enforced() {
        let mut rpt = descriptor(Some(API), Some("alpha"), Some(MACHINE));
        assert_eq!(
            check_access(&mut rpt, &policy(), "192.168.0.1".parse().unwrap()),
            Err(StreamStatus::IpNotAllowed)
        );
    }

    #[test]
    fn test_unknown_machine_guid_passes() {
        let mut rpt = descriptor(
            Some(API),
            Some("alpha"),
            Some("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee"),
        );
        assert_eq!(check(&mut rpt), Ok(()));
    }
}
