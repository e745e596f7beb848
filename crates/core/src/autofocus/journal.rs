use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Persistence for the last-autofocus timestamp.
///
/// The timestamp is recorded after every run outcome, success or not, so
/// scheduled autofocus does not hammer hardware that keeps failing.
pub trait AutofocusJournal: Send + Sync {
    fn load_last_run(&self) -> Option<DateTime<Utc>>;
    fn record(&self, at: DateTime<Utc>);
}

#[derive(Serialize, Deserialize)]
struct JournalRecord {
    last_run: DateTime<Utc>,
}

/// JSON file journal, written with an atomic rename so a crash mid-write
/// never leaves a truncated record.
pub struct FileJournal {
    path: PathBuf,
}

impl FileJournal {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn write(&self, record: &JournalRecord) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(record)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)
    }
}

impl AutofocusJournal for FileJournal {
    fn load_last_run(&self) -> Option<DateTime<Utc>> {
        let bytes = std::fs::read(&self.path).ok()?;
        match serde_json::from_slice::<JournalRecord>(&bytes) {
            Ok(record) => Some(record.last_run),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unreadable autofocus journal");
                None
            }
        }
    }

    fn record(&self, at: DateTime<Utc>) {
        if let Err(e) = self.write(&JournalRecord { last_run: at }) {
            warn!(path = %self.path.display(), error = %e, "Could not write autofocus journal");
        }
    }
}

/// In-memory journal for setups without a configured journal path.
#[derive(Default)]
pub struct NullJournal;

impl AutofocusJournal for NullJournal {
    fn load_last_run(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn record(&self, _at: DateTime<Utc>) {}
}
