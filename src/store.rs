use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::action::ActionLog;
use crate::application::{ApplicationRecord, ApplicationSummary};
use crate::error::Result;
use crate::profile::{Profile, ProfileStore};

#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn save_application(&self, record: &ApplicationRecord) -> Result<()>;

    async fn load_application(&self, id: Uuid) -> Result<ApplicationRecord>;

    /// Summaries of every stored application, newest first.
    async fn list_applications(&self) -> Result<Vec<ApplicationSummary>>;
}

#[async_trait]
pub trait LogStore: Send + Sync {
    /// Persist a finalized log and return where it went.
    async fn save_log(&self, log: &ActionLog) -> Result<PathBuf>;

    async fn load_log(&self, handle: &Path) -> Result<ActionLog>;
}

/// Pretty-printed JSON files under one data directory:
/// `applications/<id>.json`, `logs/<id>.json` and `user_profile.json`.
#[derive(Debug, Clone)]
pub struct JsonStore {
    root: PathBuf,
}

impl JsonStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn applications_dir(&self) -> PathBuf {
        self.root.join("applications")
    }

    fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    fn profile_path(&self) -> PathBuf {
        self.root.join("user_profile.json")
    }

    pub async fn save_profile(&self, profile: &Profile) -> Result<()> {
        write_json(&self.profile_path(), profile).await
    }
}

/// Write through a temp file so readers never observe a half-written record.
async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl ApplicationStore for JsonStore {
    async fn save_application(&self, record: &ApplicationRecord) -> Result<()> {
        let path = self.applications_dir().join(format!("{}.json", record.id));
        write_json(&path, record).await?;
        info!(id = %record.id, path = %path.display(), "saved application");
        Ok(())
    }

    async fn load_application(&self, id: Uuid) -> Result<ApplicationRecord> {
        read_json(&self.applications_dir().join(format!("{id}.json"))).await
    }

    async fn list_applications(&self) -> Result<Vec<ApplicationSummary>> {
        let dir = self.applications_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<ApplicationRecord>(&path).await {
                Ok(record) => summaries.push(ApplicationSummary::from(&record)),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable application"),
            }
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }
}

#[async_trait]
impl LogStore for JsonStore {
    async fn save_log(&self, log: &ActionLog) -> Result<PathBuf> {
        let path = self.logs_dir().join(format!("{}.json", log.id()));
        write_json(&path, log).await?;
        info!(id = %log.id(), actions = log.len(), path = %path.display(), "saved action log");
        Ok(path)
    }

    async fn load_log(&self, handle: &Path) -> Result<ActionLog> {
        let log: ActionLog = read_json(handle).await?;
        info!(id = %log.id(), actions = log.len(), "loaded action log");
        Ok(log)
    }
}

#[async_trait]
impl ProfileStore for JsonStore {
    /// A missing profile file yields an empty profile.
    async fn get_profile(&self) -> Result<Profile> {
        let path = self.profile_path();
        match read_json(&path).await {
            Ok(profile) => Ok(profile),
            Err(crate::error::Error::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no profile on disk; starting empty");
                Ok(Profile::default())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, LogStatus};
    use crate::application::{ApplicationStatus, ResolvedField};
    use crate::profile::JobPosting;
    use crate::recorder::ActionRecorder;
    use crate::schema::{FieldDescriptor, FieldKind};

    fn descriptor(id: &str) -> FieldDescriptor {
        FieldDescriptor {
            id: id.into(),
            kind: FieldKind::Text,
            label: Some(id.to_uppercase()),
            name: id.into(),
            selector: format!("#{id}"),
            placeholder: None,
            required: false,
            disabled: false,
            options: Vec::new(),
            current_value: String::new(),
        }
    }

    #[tokio::test]
    async fn application_round_trip_preserves_field_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());

        let mut record = ApplicationRecord::new(
            JobPosting {
                company: "Acme".into(),
                title: "Engineer".into(),
                description: String::new(),
            },
            "https://acme.example/apply",
        );
        for id in ["zeta", "alpha", "mid"] {
            record.fields.push(ResolvedField {
                descriptor: descriptor(id),
                value: format!("{id}-value"),
                resolution: None,
                applied: true,
            });
        }
        record.set_status(ApplicationStatus::Failed {
            stage: crate::application::Stage::Filling,
            cause: "boom".into(),
        });

        store.save_application(&record).await.unwrap();
        let loaded = store.load_application(record.id).await.unwrap();
        assert_eq!(loaded, record);
        let ids: Vec<_> = loaded.fields.iter().map(|f| f.descriptor.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);
    }

    #[tokio::test]
    async fn listing_is_newest_first_and_tolerates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        assert!(store.list_applications().await.unwrap().is_empty());

        let mut older = ApplicationRecord::new(JobPosting::default(), "u1");
        older.created_at = chrono::Utc::now() - chrono::Duration::days(1);
        let newer = ApplicationRecord::new(JobPosting::default(), "u2");
        store.save_application(&older).await.unwrap();
        store.save_application(&newer).await.unwrap();

        let listed = store.list_applications().await.unwrap();
        assert_eq!(listed.iter().map(|s| s.id).collect::<Vec<_>>(), vec![newer.id, older.id]);
    }

    #[tokio::test]
    async fn logs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        let mut recorder = ActionRecorder::new();
        recorder.start().unwrap();
        recorder.record(Action::Navigate {
            url: "https://acme.example/apply".into(),
        });
        recorder.record(Action::Fill {
            selector: "#email".into(),
            value: "a@b.com".into(),
        });
        let log = recorder.stop().unwrap();

        let handle = store.save_log(&log).await.unwrap();
        let loaded = store.load_log(&handle).await.unwrap();
        assert_eq!(loaded, log);
        assert_eq!(loaded.status(), LogStatus::Completed);
    }

    #[tokio::test]
    async fn missing_profile_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        assert_eq!(store.get_profile().await.unwrap(), Profile::default());

        let profile = Profile {
            full_name: "Ada".into(),
            ..Profile::default()
        };
        store.save_profile(&profile).await.unwrap();
        assert_eq!(store.get_profile().await.unwrap(), profile);
    }
}
