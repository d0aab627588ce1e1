use super::memory::StoreData;
use super::{
    check_image_path, AuditEvent, AuditSink, Election, ElectionStore, ImageStore, Profile,
    ProfileStore, StoreError, VoteRecord, VoteStore,
};
use crate::{lock_or_recover, log_debug};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Store backed by a JSON snapshot file.
///
/// Every mutation rewrites the snapshot through a temp file and rename, so a
/// crash leaves either the old or the new snapshot. Images are written into a
/// sibling `<stem>_images/` directory.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    images_dir: PathBuf,
    data: Mutex<StoreData>,
}

impl JsonFileStore {
    /// Open `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => StoreData::default(),
            Ok(text) => serde_json::from_str(&text)
                .map_err(|err| StoreError::Corrupt(format!("{}: {err}", path.display())))?,
            Err(err) if err.kind() == ErrorKind::NotFound => StoreData::default(),
            Err(err) => return Err(StoreError::Io(format!("{}: {err}", path.display()))),
        };
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ballotgate".to_string());
        let images_dir = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{stem}_images"));
        Ok(Self {
            path,
            images_dir,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        lock_or_recover(&self.data, "file store").audit.clone()
    }

    /// Apply `change` and persist; on failure the in-memory state is rolled back.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut StoreData) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut data = lock_or_recover(&self.data, "file store");
        let before = data.clone();
        let value = change(&mut *data)?;
        if let Err(err) = self.write_snapshot(&data) {
            *data = before;
            return Err(err);
        }
        Ok(value)
    }

    fn write_snapshot(&self, data: &StoreData) -> Result<(), StoreError> {
        let io = |err: std::io::Error| StoreError::Io(format!("{}: {err}", self.path.display()));
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io)?;
        }
        let json = serde_json::to_string_pretty(data)
            .map_err(|err| StoreError::Io(format!("serialize snapshot: {err}")))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io)?;
        fs::rename(&tmp, &self.path).map_err(io)?;
        Ok(())
    }
}

impl ProfileStore for JsonFileStore {
    fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError> {
        Ok(lock_or_recover(&self.data, "file store")
            .profiles
            .get(user_id)
            .cloned())
    }

    fn upsert_profile(&self, profile: Profile) -> Result<(), StoreError> {
        self.mutate(|data| data.upsert_profile(profile))
    }
}

impl VoteStore for JsonFileStore {
    fn insert_vote(&self, vote: VoteRecord) -> Result<(), StoreError> {
        self.mutate(|data| data.insert_vote(vote))
    }

    fn votes_for_voter(&self, voter_id: &str) -> Result<Vec<VoteRecord>, StoreError> {
        Ok(lock_or_recover(&self.data, "file store").votes_for_voter(voter_id))
    }
}

impl ElectionStore for JsonFileStore {
    fn list_active_elections(&self, now_ms: u64) -> Result<Vec<Election>, StoreError> {
        Ok(lock_or_recover(&self.data, "file store").active_elections(now_ms))
    }

    fn get_election(&self, election_id: &str) -> Result<Option<Election>, StoreError> {
        Ok(lock_or_recover(&self.data, "file store")
            .elections
            .get(election_id)
            .cloned())
    }

    fn upsert_election(&self, election: Election) -> Result<(), StoreError> {
        self.mutate(|data| {
            data.elections.insert(election.id.clone(), election);
            Ok(())
        })
    }
}

impl AuditSink for JsonFileStore {
    fn append(&self, event: AuditEvent) -> Result<(), StoreError> {
        self.mutate(|data| {
            data.audit.push(event);
            Ok(())
        })
    }
}

impl ImageStore for JsonFileStore {
    fn store_image(&self, path: &str, blob: &[u8]) -> Result<String, StoreError> {
        check_image_path(path)?;
        let target = self.images_dir.join(path);
        let io = |err: std::io::Error| StoreError::Io(format!("{}: {err}", target.display()));
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io)?;
        }
        fs::write(&target, blob).map_err(io)?;
        log_debug(&format!("stored image {} ({} bytes)", target.display(), blob.len()));
        Ok(target.to_string_lossy().into_owned())
    }
}
