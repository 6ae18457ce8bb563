//! Subject progress log with live subscriptions.
//!
//! Records of every user live in one list; readers only ever see their own,
//! newest first. The stored list is re-read before every change and every
//! listing, so entries written by another process show up and are kept. Subscribers get the current list immediately and then each
//! newer snapshot. Snapshots are last-write-wins, so a slow subscriber may skip
//! intermediate states but always ends on the latest one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::session::IdGenerator;
use crate::store::{PreferenceStore, StoreError, load_list, read_value, save_json};

pub const PERCENTAGE_RANGE: (i64, i64) = (0, 100);
pub const UNDERSTANDING_RANGE: (i64, i64) = (1, 5);

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("subject is required")]
    MissingSubject,

    #[error("no progress entry with id {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub id: String,
    pub uid: String,
    pub subject: String,
    #[serde(default)]
    pub topic: String,
    pub percentage: u8,
    #[serde(default)]
    pub notes: String,
    pub understanding: u8,
    pub created_at: DateTime<Utc>,
}

impl Progress {
    pub fn understanding_emoji(&self) -> &'static str {
        match self.understanding {
            0 | 1 => "😕",
            2 => "😐",
            3 => "🙂",
            4 => "😃",
            _ => "🤓",
        }
    }
}

/// Raw user input; numeric fields are clamped on append.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProgressInput {
    pub subject: String,
    pub topic: String,
    pub percentage: i64,
    pub notes: String,
    pub understanding: i64,
}

pub struct ProgressStore {
    store: Box<dyn PreferenceStore>,
    key: String,
    ids: IdGenerator,
    records: watch::Sender<Vec<Progress>>,
}

impl std::fmt::Debug for ProgressStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressStore")
            .field("key", &self.key)
            .field("entries", &self.records.borrow().len())
            .finish_non_exhaustive()
    }
}

impl ProgressStore {
    pub fn load(store: Box<dyn PreferenceStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        let records: Vec<Progress> = load_list(store.as_ref(), &key);
        debug!(count = records.len(), "loaded progress entries");
        let (records, _) = watch::channel(records);
        let mut progress = Self {
            store,
            key,
            ids: IdGenerator::new(),
            records,
        };
        progress.observe_ids();
        progress
    }

    pub fn append(&mut self, uid: &str, input: ProgressInput) -> Result<Progress, ProgressError> {
        let subject = input.subject.trim();
        if subject.is_empty() {
            return Err(ProgressError::MissingSubject);
        }
        self.refresh();
        self.observe_ids();

        let entry = Progress {
            id: self.ids.next_id(),
            uid: uid.to_string(),
            subject: subject.to_string(),
            topic: input.topic.trim().to_string(),
            percentage: input.percentage.clamp(PERCENTAGE_RANGE.0, PERCENTAGE_RANGE.1) as u8,
            notes: input.notes.trim().to_string(),
            understanding: input
                .understanding
                .clamp(UNDERSTANDING_RANGE.0, UNDERSTANDING_RANGE.1) as u8,
            created_at: Utc::now(),
        };

        let mut next = self.records.borrow().clone();
        next.push(entry.clone());
        self.commit(next)?;
        info!(id = %entry.id, subject = %entry.subject, "progress recorded");
        Ok(entry)
    }

    /// Deletes one of `uid`'s entries.
    pub fn delete(&mut self, uid: &str, id: &str) -> Result<Progress, ProgressError> {
        self.refresh();
        let mut next = self.records.borrow().clone();
        let index = next
            .iter()
            .position(|p| p.id == id && p.uid == uid)
            .ok_or_else(|| ProgressError::NotFound(id.to_string()))?;
        let removed = next.remove(index);
        self.commit(next)?;
        Ok(removed)
    }

    pub fn list_for(&self, uid: &str) -> Vec<Progress> {
        self.refresh();
        ordered_for(&self.records.borrow(), uid)
    }

    /// Live subscriptions that have not been dropped yet.
    pub fn subscriber_count(&self) -> usize {
        self.records.receiver_count()
    }

    /// Delivers `uid`'s ordered entries to `callback` now and after every
    /// change, until the returned handle is dropped or unsubscribed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe<F>(&self, uid: &str, mut callback: F) -> Subscription
    where
        F: FnMut(Vec<Progress>) + Send + 'static,
    {
        let mut rx = self.records.subscribe();
        let uid = uid.to_string();
        let task = tokio::spawn(async move {
            loop {
                let snapshot = ordered_for(&rx.borrow_and_update(), &uid);
                callback(snapshot);
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });
        Subscription { task }
    }

    /// Adopts the stored list when it differs, notifying subscribers. An
    /// unreadable store leaves the current list in place.
    fn refresh(&self) {
        match read_value::<Vec<Progress>>(self.store.as_ref(), &self.key) {
            Ok(Some(stored)) => {
                self.records.send_if_modified(|current| {
                    if *current == stored {
                        return false;
                    }
                    *current = stored;
                    true
                });
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not re-read progress entries"),
        }
    }

    fn observe_ids(&mut self) {
        for entry in self.records.borrow().iter() {
            self.ids.observe(&entry.id);
        }
    }

    // Persist first so memory never runs ahead of the store.
    fn commit(&mut self, next: Vec<Progress>) -> Result<(), ProgressError> {
        save_json(self.store.as_mut(), &self.key, &next)?;
        self.records.send_replace(next);
        Ok(())
    }
}

fn ordered_for(records: &[Progress], uid: &str) -> Vec<Progress> {
    let mut mine: Vec<Progress> = records.iter().filter(|p| p.uid == uid).cloned().collect();
    mine.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    mine
}

/// Live subscription; dropping it stops delivery.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    /// Consumes the handle, aborting the forwarding task.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tokio::sync::mpsc;

    fn input(subject: &str, percentage: i64, understanding: i64) -> ProgressInput {
        ProgressInput {
            subject: subject.to_string(),
            topic: "Kinematics".to_string(),
            percentage,
            notes: String::new(),
            understanding,
        }
    }

    fn store() -> (MemoryStore, ProgressStore) {
        let backing = MemoryStore::new();
        let progress = ProgressStore::load(Box::new(backing.clone()), "progress");
        (backing, progress)
    }

    #[test]
    fn append_clamps_numeric_fields() {
        let (_, mut progress) = store();
        let entry = progress.append("u1", input("Physics", 140, 0)).unwrap();
        assert_eq!(entry.percentage, 100);
        assert_eq!(entry.understanding, 1);

        let entry = progress.append("u1", input("Math", -5, 9)).unwrap();
        assert_eq!(entry.percentage, 0);
        assert_eq!(entry.understanding, 5);
        assert_eq!(entry.understanding_emoji(), "🤓");
    }

    #[test]
    fn append_requires_a_subject() {
        let (_, mut progress) = store();
        let err = progress.append("u1", input("  ", 50, 3)).unwrap_err();
        assert!(matches!(err, ProgressError::MissingSubject));
        assert!(progress.list_for("u1").is_empty());
    }

    #[test]
    fn listing_is_per_user_and_newest_first() {
        let (_, mut progress) = store();
        let first = progress.append("u1", input("Physics", 10, 3)).unwrap();
        progress.append("u2", input("Chemistry", 20, 3)).unwrap();
        let third = progress.append("u1", input("Math", 30, 3)).unwrap();

        let ids: Vec<_> = progress.list_for("u1").into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![third.id, first.id]);
    }

    #[test]
    fn delete_only_touches_own_entries() {
        let (backing, mut progress) = store();
        let entry = progress.append("u1", input("Physics", 10, 3)).unwrap();

        assert!(matches!(
            progress.delete("u2", &entry.id),
            Err(ProgressError::NotFound(_))
        ));
        progress.delete("u1", &entry.id).unwrap();
        assert!(progress.list_for("u1").is_empty());

        let reloaded = ProgressStore::load(Box::new(backing), "progress");
        assert!(reloaded.list_for("u1").is_empty());
    }

    #[test]
    fn failed_write_leaves_list_unchanged() {
        let (backing, mut progress) = store();
        backing.fail_writes(true);
        assert!(progress.append("u1", input("Physics", 10, 3)).is_err());
        assert!(progress.list_for("u1").is_empty());
    }

    #[test]
    fn entries_from_another_writer_are_listed_and_kept() {
        let (backing, mut daemon) = store();
        daemon.append("u1", input("Physics", 10, 3)).unwrap();

        let mut cli = ProgressStore::load(Box::new(backing.clone()), "progress");
        let theirs = cli.append("u1", input("Chemistry", 20, 3)).unwrap();

        assert_eq!(daemon.list_for("u1").len(), 2);
        let mine = daemon.append("u1", input("Math", 30, 3)).unwrap();
        assert_ne!(mine.id, theirs.id);

        let reloaded = ProgressStore::load(Box::new(backing), "progress");
        let subjects: Vec<_> = reloaded
            .list_for("u1")
            .into_iter()
            .map(|p| p.subject)
            .collect();
        assert_eq!(subjects, vec!["Math", "Chemistry", "Physics"]);
    }

    #[tokio::test]
    async fn subscribers_get_current_then_updated_snapshots() {
        let (_, mut progress) = store();
        progress.append("u1", input("Physics", 10, 3)).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = progress.subscribe("u1", move |snapshot| {
            let _ = tx.send(snapshot);
        });

        let initial = rx.recv().await.unwrap();
        assert_eq!(initial.len(), 1);

        progress.append("u2", input("Chemistry", 10, 3)).unwrap();
        progress.append("u1", input("Math", 10, 3)).unwrap();

        // Last write wins: keep reading until the newest state shows up.
        let mut latest = rx.recv().await.unwrap();
        while latest.len() < 2 {
            latest = rx.recv().await.unwrap();
        }
        assert_eq!(latest[0].subject, "Math");
        assert!(latest.iter().all(|p| p.uid == "u1"));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let (_, mut progress) = store();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = progress.subscribe("u1", move |snapshot| {
            let _ = tx.send(snapshot);
        });
        assert!(rx.recv().await.unwrap().is_empty());

        subscription.unsubscribe();
        progress.append("u1", input("Physics", 10, 3)).unwrap();

        // The callback (and its sender) is gone once the task is torn down.
        assert!(rx.recv().await.is_none());
    }
}
