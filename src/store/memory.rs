use super::{
    check_image_path, AuditEvent, AuditSink, Election, ElectionStore, ImageStore, Profile,
    ProfileStore, StoreError, VoteRecord, VoteStore,
};
use crate::lock_or_recover;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Store contents; also the on-disk snapshot format of [`super::JsonFileStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(super) struct StoreData {
    #[serde(default)]
    pub(super) profiles: BTreeMap<String, Profile>,
    #[serde(default)]
    pub(super) votes: Vec<VoteRecord>,
    #[serde(default)]
    pub(super) elections: BTreeMap<String, Election>,
    #[serde(default)]
    pub(super) audit: Vec<AuditEvent>,
}

impl StoreData {
    pub(super) fn upsert_profile(&mut self, profile: Profile) -> Result<(), StoreError> {
        if profile.user_id.trim().is_empty() {
            return Err(StoreError::InvalidRecord("profile without user id".to_string()));
        }
        self.profiles.insert(profile.user_id.clone(), profile);
        Ok(())
    }

    pub(super) fn insert_vote(&mut self, vote: VoteRecord) -> Result<(), StoreError> {
        let exists = self
            .votes
            .iter()
            .any(|v| v.voter_id == vote.voter_id && v.election_id == vote.election_id);
        if exists {
            return Err(StoreError::Duplicate {
                voter_id: vote.voter_id,
                election_id: vote.election_id,
            });
        }
        self.votes.push(vote);
        Ok(())
    }

    pub(super) fn votes_for_voter(&self, voter_id: &str) -> Vec<VoteRecord> {
        self.votes
            .iter()
            .filter(|v| v.voter_id == voter_id)
            .cloned()
            .collect()
    }

    pub(super) fn active_elections(&self, now_ms: u64) -> Vec<Election> {
        self.elections
            .values()
            .filter(|e| e.is_active(now_ms))
            .cloned()
            .collect()
    }
}

/// Process-local store used by tests and the IPC mode without `--store`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
    images: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        lock_or_recover(&self.data, "memory store").audit.clone()
    }

    pub fn image(&self, path: &str) -> Option<Vec<u8>> {
        lock_or_recover(&self.images, "memory images")
            .get(path)
            .cloned()
    }
}

impl ProfileStore for MemoryStore {
    fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError> {
        Ok(lock_or_recover(&self.data, "memory store")
            .profiles
            .get(user_id)
            .cloned())
    }

    fn upsert_profile(&self, profile: Profile) -> Result<(), StoreError> {
        lock_or_recover(&self.data, "memory store").upsert_profile(profile)
    }
}

impl VoteStore for MemoryStore {
    fn insert_vote(&self, vote: VoteRecord) -> Result<(), StoreError> {
        lock_or_recover(&self.data, "memory store").insert_vote(vote)
    }

    fn votes_for_voter(&self, voter_id: &str) -> Result<Vec<VoteRecord>, StoreError> {
        Ok(lock_or_recover(&self.data, "memory store").votes_for_voter(voter_id))
    }
}

impl ElectionStore for MemoryStore {
    fn list_active_elections(&self, now_ms: u64) -> Result<Vec<Election>, StoreError> {
        Ok(lock_or_recover(&self.data, "memory store").active_elections(now_ms))
    }

    fn get_election(&self, election_id: &str) -> Result<Option<Election>, StoreError> {
        Ok(lock_or_recover(&self.data, "memory store")
            .elections
            .get(election_id)
            .cloned())
    }

    fn upsert_election(&self, election: Election) -> Result<(), StoreError> {
        lock_or_recover(&self.data, "memory store")
            .elections
            .insert(election.id.clone(), election);
        Ok(())
    }
}

impl AuditSink for MemoryStore {
    fn append(&self, event: AuditEvent) -> Result<(), StoreError> {
        lock_or_recover(&self.data, "memory store").audit.push(event);
        Ok(())
    }
}

impl ImageStore for MemoryStore {
    fn store_image(&self, path: &str, blob: &[u8]) -> Result<String, StoreError> {
        check_image_path(path)?;
        lock_or_recover(&self.images, "memory images").insert(path.to_string(), blob.to_vec());
        Ok(format!("memory://{path}"))
    }
}
