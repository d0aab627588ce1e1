//! Profile, vote, election, audit and image persistence.
//!
//! The session core only depends on the traits here. [`MemoryStore`] keeps
//! everything in process; [`JsonFileStore`] writes a JSON snapshot after every
//! mutation so the CLI can carry state between runs.

mod file;
mod memory;

use crate::config::is_valid_identifier;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub image_ref: Option<String>,
    #[serde(default)]
    pub enrolled_at_ms: Option<u64>,
}

impl Profile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            embedding: None,
            verified: false,
            image_ref: None,
            enrolled_at_ms: None,
        }
    }

    /// Enrolled template usable for verification.
    pub fn reference(&self) -> Option<&[f32]> {
        match (&self.embedding, self.verified) {
            (Some(embedding), true) if !embedding.is_empty() => Some(embedding),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionOption {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Election {
    pub id: String,
    pub title: String,
    pub options: Vec<ElectionOption>,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl Election {
    pub fn is_active(&self, now_ms: u64) -> bool {
        self.start_ms <= now_ms && now_ms <= self.end_ms
    }

    pub fn option(&self, option_id: &str) -> Option<&ElectionOption> {
        self.options.iter().find(|option| option.id == option_id)
    }

    fn validate(&self) -> Result<()> {
        if !is_valid_identifier(&self.id) {
            bail!("election id '{}' is not a valid identifier", self.id);
        }
        if self.options.is_empty() {
            bail!("election '{}' has no options", self.id);
        }
        if self.start_ms > self.end_ms {
            bail!("election '{}' ends before it starts", self.id);
        }
        for (idx, option) in self.options.iter().enumerate() {
            if !is_valid_identifier(&option.id) {
                bail!(
                    "election '{}' option '{}' is not a valid identifier",
                    self.id,
                    option.id
                );
            }
            if self.options[..idx].iter().any(|prev| prev.id == option.id) {
                bail!("election '{}' repeats option '{}'", self.id, option.id);
            }
        }
        Ok(())
    }
}

/// Where and how a vote was cast.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VoteContext {
    pub session_id: String,
    pub detector: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub voter_id: String,
    pub election_id: String,
    pub option_id: String,
    pub face_verified: bool,
    pub blink_verified: bool,
    pub cast_at_ms: u64,
    #[serde(default)]
    pub context: VoteContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    EnrollSuccess,
    VerifySuccess,
    VerifyFailed,
    LivenessSuccess,
    LivenessFailed,
    VoteCast,
}

impl AuditKind {
    pub fn label(self) -> &'static str {
        match self {
            AuditKind::EnrollSuccess => "enroll_success",
            AuditKind::VerifySuccess => "verify_success",
            AuditKind::VerifyFailed => "verify_failed",
            AuditKind::LivenessSuccess => "liveness_success",
            AuditKind::LivenessFailed => "liveness_failed",
            AuditKind::VoteCast => "vote_cast",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub subject_id: String,
    pub kind: AuditKind,
    pub detail: serde_json::Value,
    pub at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A vote for this voter and election already exists.
    Duplicate { voter_id: String, election_id: String },
    NotFound(String),
    InvalidRecord(String),
    Io(String),
    Corrupt(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Duplicate {
                voter_id,
                election_id,
            } => write!(f, "voter {voter_id} already voted in election {election_id}"),
            StoreError::NotFound(what) => write!(f, "{what} not found"),
            StoreError::InvalidRecord(msg) => write!(f, "invalid record: {msg}"),
            StoreError::Io(msg) => write!(f, "store I/O failed: {msg}"),
            StoreError::Corrupt(msg) => write!(f, "store snapshot is corrupt: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

pub trait ProfileStore {
    fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError>;
    fn upsert_profile(&self, profile: Profile) -> Result<(), StoreError>;
}

pub trait VoteStore {
    /// Insert a vote; at most one per `(voter_id, election_id)`.
    fn insert_vote(&self, vote: VoteRecord) -> Result<(), StoreError>;
    fn votes_for_voter(&self, voter_id: &str) -> Result<Vec<VoteRecord>, StoreError>;
}

pub trait ElectionStore {
    fn list_active_elections(&self, now_ms: u64) -> Result<Vec<Election>, StoreError>;
    fn get_election(&self, election_id: &str) -> Result<Option<Election>, StoreError>;
    fn upsert_election(&self, election: Election) -> Result<(), StoreError>;
}

/// Append-only audit trail. Callers treat failures as non-fatal.
pub trait AuditSink {
    fn append(&self, event: AuditEvent) -> Result<(), StoreError>;
}

pub trait ImageStore {
    /// Store `blob` under a relative `path` and return a reference to it.
    fn store_image(&self, path: &str, blob: &[u8]) -> Result<String, StoreError>;
}

/// Everything the session runner needs from the backing store.
pub trait BallotStore:
    ProfileStore + VoteStore + ElectionStore + AuditSink + ImageStore + Send + Sync
{
}

impl<T> BallotStore for T where
    T: ProfileStore + VoteStore + ElectionStore + AuditSink + ImageStore + Send + Sync
{
}

/// Relative image key for an enrollment capture.
pub fn enrollment_image_path(user_id: &str, at_ms: u64) -> String {
    format!("enrollments/{user_id}/{at_ms}.img")
}

pub(crate) fn check_image_path(path: &str) -> Result<(), StoreError> {
    let bad = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(StoreError::InvalidRecord(format!(
            "image path '{path}' must be relative without '.' or '..' segments"
        )));
    }
    Ok(())
}

/// Load elections from a JSON array file and upsert them. Returns how many were imported.
pub fn import_elections(store: &dyn ElectionStore, path: &Path) -> Result<usize> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read elections file {}", path.display()))?;
    let elections: Vec<Election> = serde_json::from_str(&text)
        .with_context(|| format!("elections file {} is not a JSON array", path.display()))?;
    for election in &elections {
        election.validate()?;
    }
    let count = elections.len();
    for election in elections {
        let id = election.id.clone();
        store
            .upsert_election(election)
            .with_context(|| format!("failed to store election {id}"))?;
    }
    Ok(count)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub(crate) fn election(id: &str, start_ms: u64, end_ms: u64) -> Election {
        Election {
            id: id.to_string(),
            title: format!("Election {id}"),
            options: vec![
                ElectionOption {
                    id: "yes".to_string(),
                    label: "Yes".to_string(),
                },
                ElectionOption {
                    id: "no".to_string(),
                    label: "No".to_string(),
                },
            ],
            start_ms,
            end_ms,
        }
    }

    pub(crate) fn vote(voter: &str, election: &str, option: &str) -> VoteRecord {
        VoteRecord {
            voter_id: voter.to_string(),
            election_id: election.to_string(),
            option_id: option.to_string(),
            face_verified: true,
            blink_verified: true,
            cast_at_ms: 1_000,
            context: VoteContext::default(),
        }
    }
}
