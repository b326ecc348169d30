//! The invite registry: pending rendezvous between a receiver and a sender
//! (spec §3, §4.2).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

use data_encoding::{BASE32_NOPAD, BASE64_NOPAD};
use rand::RngCore;
use ssh_portal_codec::protocol::SenderMeta;
use ssh_portal_common::helpers::rng::get_crypto_rng;
use tokio::sync::{broadcast, oneshot};

use crate::error::RelayError;

pub const DEFAULT_TTL_SECONDS: u32 = 600;
pub const MAX_TTL_SECONDS: u32 = 3600;

/// Handed to the paired receiver's connection task once a sender arrives,
/// carrying everything it needs to reply `ready` and start splicing.
pub struct PairedHandoff {
    pub code: String,
    pub receiver_fp: String,
    pub sender_addr: SocketAddr,
    pub exp: u64,
    pub alg: Option<String>,
    pub sender: Option<SenderMeta>,
    pub sender_stream: tokio::net::TcpStream,
    pub sender_residual: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum RegistryEvent {
    NewInvite { rid: String },
    ClosedInvite { rid: String, reason: &'static str },
}

pub struct Invite {
    pub rid: String,
    pub code: String,
    pub receiver_fp: String,
    pub created_at: SystemTime,
    pub expires_at: SystemTime,
    pub sent_ok: bool,
    pub sender: Option<SenderMeta>,
    attached: Option<oneshot::Sender<PairedHandoff>>,
}

impl Invite {
    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }
}

pub struct InviteRegistry {
    by_rid: HashMap<String, Invite>,
    by_code: HashMap<String, String>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Default for InviteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InviteRegistry {
    pub fn new() -> Self {
        Self {
            by_rid: HashMap::new(),
            by_code: HashMap::new(),
            events: broadcast::channel(64).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Allocates a fresh RID and relay code and inserts the invite into both
    /// indexes (invariant i).
    pub fn mint(&mut self, receiver_fp: String, ttl_seconds: Option<u32>) -> (String, String, u64) {
        let ttl = ttl_seconds
            .unwrap_or(DEFAULT_TTL_SECONDS)
            .min(MAX_TTL_SECONDS) as u64;

        let mut rid_bytes = [0u8; 16];
        get_crypto_rng().fill_bytes(&mut rid_bytes);
        let rid = BASE32_NOPAD.encode(&rid_bytes);

        let mut code_bytes = [0u8; 4];
        get_crypto_rng().fill_bytes(&mut code_bytes);
        let code = BASE64_NOPAD.encode(&code_bytes);

        let now = SystemTime::now();
        let expires_at = now + Duration::from_secs(ttl);
        let exp = expires_at
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        self.by_rid.insert(
            rid.clone(),
            Invite {
                rid: rid.clone(),
                code: code.clone(),
                receiver_fp,
                created_at: now,
                expires_at,
                sent_ok: false,
                sender: None,
                attached: None,
            },
        );
        self.by_code.insert(code.clone(), rid.clone());

        let _ = self.events.send(RegistryEvent::NewInvite { rid: rid.clone() });
        (rid, code, exp)
    }

    pub fn get_by_rid(&self, rid: &str) -> Option<&Invite> {
        self.by_rid.get(rid)
    }

    pub fn get_by_code(&self, code: &str) -> Option<&Invite> {
        self.by_code.get(code).and_then(|rid| self.by_rid.get(rid))
    }

    /// Registers the receiver's reply channel for a not-yet-attached invite.
    /// Returns `AlreadyAttached` if one is already registered (invariant iv).
    pub fn attach(&mut self, rid: &str, reply: oneshot::Sender<PairedHandoff>) -> Result<(), RelayError> {
        let invite = self.by_rid.get_mut(rid).ok_or(RelayError::NoInvite)?;
        if invite.attached.is_some() {
            return Err(RelayError::AlreadyAttached);
        }
        invite.attached = Some(reply);
        Ok(())
    }

    /// Atomically reads and sets the `sentOK` guard in one lock scope,
    /// returning the value it held *before* this call. Callers use this to
    /// decide whether they are the one sender allowed to emit `ok` for this
    /// invite (invariant: pairing is serialized at lookup-and-delete, so the
    /// guard must never be read and written as two separate locked steps).
    pub fn try_mark_sent_ok(&mut self, rid: &str) -> bool {
        match self.by_rid.get_mut(rid) {
            Some(invite) => std::mem::replace(&mut invite.sent_ok, true),
            None => true,
        }
    }

    pub fn set_sender_meta(&mut self, rid: &str, meta: Option<SenderMeta>) {
        if let Some(invite) = self.by_rid.get_mut(rid) {
            invite.sender = meta;
        }
    }

    /// Removes the invite from both indexes and returns it (invariant v: the
    /// caller must delete before splicing begins).
    pub fn delete(&mut self, rid: &str, reason: &'static str) -> Option<Invite> {
        let invite = self.by_rid.remove(rid)?;
        self.by_code.remove(&invite.code);
        let _ = self.events.send(RegistryEvent::ClosedInvite {
            rid: invite.rid.clone(),
            reason,
        });
        Some(invite)
    }

    /// Takes the attached reply channel out of an invite without removing
    /// the invite itself, for the pairing task to hand off the sender side.
    pub fn take_attached(&mut self, rid: &str) -> Option<oneshot::Sender<PairedHandoff>> {
        self.by_rid.get_mut(rid).and_then(|inv| inv.attached.take())
    }

    /// Clears the attached reply channel without deleting the invite, so a
    /// receiver whose waiting socket died before a sender arrived can
    /// re-attach with `await` on a new socket (spec §4.1 "await").
    pub fn detach(&mut self, rid: &str) {
        if let Some(invite) = self.by_rid.get_mut(rid) {
            invite.attached = None;
        }
    }

    /// Walks all invites, removing and returning those past their expiry.
    pub fn reap_expired(&mut self, now: SystemTime) -> Vec<Invite> {
        let expired: Vec<String> = self
            .by_rid
            .values()
            .filter(|inv| inv.expires_at < now)
            .map(|inv| inv.rid.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|rid| self.delete(&rid, "expired"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_inserts_into_both_indexes() {
        let mut reg = InviteRegistry::new();
        let (rid, code, _exp) = reg.mint("SHA256:abc".into(), None);
        assert!(reg.get_by_rid(&rid).is_some());
        assert!(reg.get_by_code(&code).is_some());
    }

    #[test]
    fn rid_and_code_are_unique_across_mints() {
        let mut reg = InviteRegistry::new();
        let mut rids = std::collections::HashSet::new();
        let mut codes = std::collections::HashSet::new();
        for _ in 0..100 {
            let (rid, code, _) = reg.mint("SHA256:abc".into(), None);
            assert!(rids.insert(rid));
            assert!(codes.insert(code));
        }
    }

    #[test]
    fn second_attach_is_rejected() {
        let mut reg = InviteRegistry::new();
        let (rid, _, _) = reg.mint("SHA256:abc".into(), None);
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        assert!(reg.attach(&rid, tx1).is_ok());
        assert!(matches!(reg.attach(&rid, tx2), Err(RelayError::AlreadyAttached)));
    }

    #[test]
    fn detach_clears_the_slot_without_deleting_the_invite() {
        let mut reg = InviteRegistry::new();
        let (rid, code, _) = reg.mint("SHA256:abc".into(), None);
        let (tx1, _rx1) = oneshot::channel();
        reg.attach(&rid, tx1).unwrap();

        reg.detach(&rid);

        assert!(reg.get_by_rid(&rid).is_some(), "invite must survive a detach");
        assert!(reg.get_by_code(&code).is_some());
        assert!(!reg.get_by_rid(&rid).unwrap().is_attached());

        let (tx2, _rx2) = oneshot::channel();
        assert!(reg.attach(&rid, tx2).is_ok(), "a fresh attach must succeed after detach");
    }

    #[test]
    fn detach_on_unknown_rid_is_a_no_op() {
        let mut reg = InviteRegistry::new();
        reg.detach("does-not-exist");
    }

    #[test]
    fn delete_removes_from_both_indexes() {
        let mut reg = InviteRegistry::new();
        let (rid, code, _) = reg.mint("SHA256:abc".into(), None);
        assert!(reg.delete(&rid, "paired").is_some());
        assert!(reg.get_by_rid(&rid).is_none());
        assert!(reg.get_by_code(&code).is_none());
    }

    #[test]
    fn ttl_is_capped_at_max() {
        let mut reg = InviteRegistry::new();
        let (rid, _, exp) = reg.mint("SHA256:abc".into(), Some(999_999));
        let invite = reg.get_by_rid(&rid).unwrap();
        let actual_ttl = invite
            .expires_at
            .duration_since(invite.created_at)
            .unwrap()
            .as_secs();
        assert_eq!(actual_ttl, MAX_TTL_SECONDS as u64);
        assert!(exp > 0);
    }

    #[test]
    fn reap_expired_removes_only_past_invites() {
        let mut reg = InviteRegistry::new();
        let (rid, _, _) = reg.mint("SHA256:abc".into(), Some(1));
        let far_future = SystemTime::now() + Duration::from_secs(10);
        let expired = reg.reap_expired(far_future);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].rid, rid);
        assert!(reg.get_by_rid(&rid).is_none());
    }
}
