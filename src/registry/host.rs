//! Host registry: one record per known child node.
//!
//! # Responsibilities
//! - Look up hosts by machine GUID, creating them on first contact
//! - Serialize receiver attachment per host (at most one live receiver)
//! - Track per-host lifecycle flags the admission pipeline consults
//!
//! # Design Decisions
//! - DashMap for the GUID index; per-host state behind its own locks so
//!   attachment checks never hold the map shard
//! - The receiver slot holds only id, hostname and the shared control
//!   block. The worker owns the transport; eviction goes through the
//!   control block, never through the worker's resources.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use uuid::Uuid;

use crate::resilience::ParentBackoff;
use crate::stream::descriptor::{ReceiverControl, ReceiverId, StopReason, SystemInfo};

/// The registry-visible handle of an attached receiver.
#[derive(Debug, Clone)]
pub struct ReceiverAttachment {
    pub id: ReceiverId,
    pub hostname: String,
    pub control: Arc<ReceiverControl>,
}

/// Mutable host metadata refreshed on every (re)connection.
#[derive(Debug, Clone, Default)]
pub struct HostMeta {
    pub os: Option<String>,
    pub timezone: Option<String>,
    pub abbrev_timezone: Option<String>,
    pub utc_offset: Option<i32>,
    pub program_name: Option<String>,
    pub program_version: Option<String>,
    pub update_every: u32,
}

/// Identity and metadata used to find or create a host.
#[derive(Debug, Clone)]
pub struct HostIdentity {
    pub machine_guid: Uuid,
    pub hostname: String,
    pub registry_hostname: String,
    pub meta: HostMeta,
}

/// One known child node.
#[derive(Debug)]
pub struct Host {
    pub machine_guid: Uuid,
    hostname: Mutex<String>,
    registry_hostname: Mutex<String>,

    /// At most one live receiver. All attach/evict decisions happen under
    /// this lock.
    receiver: Mutex<Option<ReceiverAttachment>>,

    archived: AtomicBool,
    pending_init: AtomicBool,
    ephemeral: AtomicBool,

    system_info: Mutex<Option<SystemInfo>>,
    meta: Mutex<HostMeta>,

    /// Backoff for this host's own upstream connections; reset when a
    /// child reconnects so propagation resumes promptly.
    pub parent_backoff: ParentBackoff,
}

impl Host {
    fn new(identity: HostIdentity, system_info: Option<SystemInfo>) -> Self {
        Self {
            machine_guid: identity.machine_guid,
            hostname: Mutex::new(identity.hostname),
            registry_hostname: Mutex::new(identity.registry_hostname),
            receiver: Mutex::new(None),
            archived: AtomicBool::new(false),
            pending_init: AtomicBool::new(false),
            ephemeral: AtomicBool::new(false),
            system_info: Mutex::new(system_info),
            meta: Mutex::new(identity.meta),
            parent_backoff: ParentBackoff::default(),
        }
    }

    pub fn hostname(&self) -> String {
        self.hostname.lock().expect("host mutex poisoned").clone()
    }

    pub fn registry_hostname(&self) -> String {
        self.registry_hostname
            .lock()
            .expect("host mutex poisoned")
            .clone()
    }

    /// Lock the receiver slot. The admission pipeline holds this guard
    /// across its whole check-evict-replace sequence so two concurrent
    /// attempts for the same host serialize here.
    pub fn receiver_lock(&self) -> MutexGuard<'_, Option<ReceiverAttachment>> {
        self.receiver.lock().expect("host mutex poisoned")
    }

    /// Attach a receiver if the slot is free. Returns false when another
    /// receiver is already attached.
    pub fn attach_receiver(&self, attachment: ReceiverAttachment) -> bool {
        let mut slot = self.receiver_lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(attachment);
        true
    }

    /// Detach the receiver identified by `id`. A no-op when the slot is
    /// empty or already holds a newer receiver.
    pub fn clear_receiver(&self, id: ReceiverId) {
        let mut slot = self.receiver_lock();
        if slot.as_ref().is_some_and(|att| att.id == id) {
            *slot = None;
        }
    }

    pub fn has_receiver(&self) -> bool {
        self.receiver_lock().is_some()
    }

    pub fn is_archived(&self) -> bool {
        self.archived.load(Ordering::Acquire)
    }

    pub fn set_archived(&self, value: bool) {
        self.archived.store(value, Ordering::Release);
    }

    pub fn is_pending_init(&self) -> bool {
        self.pending_init.load(Ordering::Acquire)
    }

    pub fn set_pending_init(&self, value: bool) {
        self.pending_init.store(value, Ordering::Release);
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral.load(Ordering::Acquire)
    }

    pub fn set_ephemeral(&self, value: bool) {
        self.ephemeral.store(value, Ordering::Release);
    }

    /// Refresh the mutable metadata on reconnection.
    pub fn update_identity(&self, identity: HostIdentity, system_info: Option<SystemInfo>) {
        *self.hostname.lock().expect("host mutex poisoned") = identity.hostname;
        *self.registry_hostname.lock().expect("host mutex poisoned") =
            identity.registry_hostname;
        *self.meta.lock().expect("host mutex poisoned") = identity.meta;
        if let Some(info) = system_info {
            *self.system_info.lock().expect("host mutex poisoned") = Some(info);
        }
    }

    pub fn meta(&self) -> HostMeta {
        self.meta.lock().expect("host mutex poisoned").clone()
    }
}

/// The set of all known hosts, indexed by machine GUID.
pub struct HostRegistry {
    hosts: DashMap<Uuid, Arc<Host>>,
    /// Cleared during startup and shutdown so children get a retryable
    /// "busy" answer instead of a denial.
    accepting_children: AtomicBool,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self {
            hosts: DashMap::new(),
            accepting_children: AtomicBool::new(true),
        }
    }

    pub fn accepting_children(&self) -> bool {
        self.accepting_children.load(Ordering::Acquire)
    }

    pub fn set_accepting_children(&self, value: bool) {
        self.accepting_children.store(value, Ordering::Release);
    }

    /// Look up a host by machine GUID. Archived hosts are invisible to the
    /// admission pipeline until recreated.
    pub fn find_by_guid(&self, guid: &Uuid) -> Option<Arc<Host>> {
        self.hosts
            .get(guid)
            .map(|entry| entry.value().clone())
            .filter(|host| !host.is_archived())
    }

    /// Find the host for this identity, creating it on first contact.
    /// Existing hosts get their metadata refreshed. Returns None only when
    /// host creation is impossible (the GUID slot is archived and cannot
    /// be revived right now).
    pub fn find_or_create(
        &self,
        identity: HostIdentity,
        system_info: Option<SystemInfo>,
    ) -> Option<Arc<Host>> {
        let entry = self
            .hosts
            .entry(identity.machine_guid)
            .or_insert_with(|| Arc::new(Host::new(identity.clone(), None)));
        let host = entry.value().clone();
        drop(entry);

        if host.is_archived() {
            return None;
        }

        host.update_identity(identity, system_info);
        Some(host)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Signal every attached receiver to stop. Used on shutdown; waiting
    /// for acknowledgement is the pool's job.
    pub fn signal_all_receivers(&self, reason: StopReason) {
        for entry in self.hosts.iter() {
            let slot = entry.value().receiver_lock();
            if let Some(att) = slot.as_ref() {
                att.control.signal_stop(reason);
            }
        }
    }
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(guid: Uuid, hostname: &str) -> HostIdentity {
        HostIdentity {
            machine_guid: guid,
            hostname: hostname.to_string(),
            registry_hostname: hostname.to_string(),
            meta: HostMeta {
                update_every: 1,
                ..HostMeta::default()
            },
        }
    }

    fn attachment() -> ReceiverAttachment {
        ReceiverAttachment {
            id: ReceiverId::new(),
            hostname: "child".to_string(),
            control: Arc::new(ReceiverControl::new()),
        }
    }

    #[test]
    fn test_find_or_create_reuses_host() {
        let registry = HostRegistry::new();
        let guid = Uuid::new_v4();

        let first = registry.find_or_create(identity(guid, "alpha"), None).unwrap();
        let second = registry.find_or_create(identity(guid, "beta"), None).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.hostname(), "beta");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_attach_is_exclusive() {
        let registry = HostRegistry::new();
        let host = registry
            .find_or_create(identity(Uuid::new_v4(), "alpha"), None)
            .unwrap();

        assert!(host.attach_receiver(attachment()));
        assert!(!host.attach_receiver(attachment()));
    }

    #[test]
    fn test_clear_receiver_checks_identity() {
        let registry = HostRegistry::new();
        let host = registry
            .find_or_create(identity(Uuid::new_v4(), "alpha"), None)
            .unwrap();

        let old = attachment();
        let old_id = old.id;
        assert!(host.attach_receiver(old));

        // replacement happened while the old worker was still unwinding
        {
            let mut slot = host.receiver_lock();
            *slot = Some(attachment());
        }

        host.clear_receiver(old_id);
        assert!(host.has_receiver());
    }

    #[test]
    fn test_archived_host_is_invisible() {
        let registry = HostRegistry::new();
        let guid = Uuid::new_v4();
        let host = registry.find_or_create(identity(guid, "alpha"), None).unwrap();

        host.set_archived(true);
        assert!(registry.find_by_guid(&guid).is_none());
        assert!(registry.find_or_create(identity(guid, "alpha"), None).is_none());
    }

    #[test]
    fn test_signal_all_receivers() {
        let registry = HostRegistry::new();
        let host = registry
            .find_or_create(identity(Uuid::new_v4(), "alpha"), None)
            .unwrap();
        let att = attachment();
        let control = att.control.clone();
        host.attach_receiver(att);

        registry.signal_all_receivers(StopReason::Shutdown);
        assert!(control.should_stop());
        assert_eq!(control.stop_reason(), Some(StopReason::Shutdown));
    }
}
