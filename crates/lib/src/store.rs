//! Day-scoped key/value store backing the persisted identity.
//!
//! Entries live in one JSON file as `{"<namespace>.<key>": {"value": .., "expiry": ms}}`.
//! Every write expires at the end of the local calendar day it was made on.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredItem {
    value: String,
    /// Epoch milliseconds after which the item is gone.
    expiry: i64,
}

type Items = BTreeMap<String, StoredItem>;

/// Epoch millis of 23:59:59.999 local time on `now`'s date.
pub fn end_of_day_millis(now: DateTime<Local>) -> i64 {
    end_of_day(now).timestamp_millis()
}

/// 23:59:59.999 local time on `now`'s date.
pub fn end_of_day(now: DateTime<Local>) -> DateTime<Local> {
    now.date_naive()
        .and_hms_milli_opt(23, 59, 59, 999)
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .unwrap_or(now)
}

/// File-backed store; keys are prefixed with the namespace.
#[derive(Debug, Clone)]
pub struct DayStore {
    path: PathBuf,
    namespace: String,
}

impl DayStore {
    pub fn open(path: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            namespace: namespace.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}.{}", self.namespace, key)
    }

    /// Value for `key`, or None if missing or expired at `now`. Expired entries are removed.
    pub fn get(&self, key: &str, now: DateTime<Local>) -> Result<Option<String>> {
        let full = self.full_key(key);
        let now_ms = now.timestamp_millis();
        let mut expired = false;
        let value = self.with_items(|items| {
            let item = items.get(&full).cloned()?;
            if now_ms > item.expiry {
                items.remove(&full);
                expired = true;
                None
            } else {
                Some(item.value)
            }
        })?;
        if expired {
            log::debug!("stored key {} expired", full);
        }
        Ok(value)
    }

    /// Store `value` under `key`, expiring at the end of `now`'s day.
    pub fn set(&self, key: &str, value: &str, now: DateTime<Local>) -> Result<()> {
        let full = self.full_key(key);
        let item = StoredItem {
            value: value.to_string(),
            expiry: end_of_day_millis(now),
        };
        self.with_items(|items| {
            items.insert(full, item);
        })
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let full = self.full_key(key);
        self.with_items(|items| {
            items.remove(&full);
        })
    }

    /// Read-modify-write under an exclusive lock. The file is rewritten only when `f` changed it.
    fn with_items<T>(&self, f: impl FnOnce(&mut Items) -> T) -> Result<T> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating store directory {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .with_context(|| format!("opening store {}", self.path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("locking store {}", self.path.display()))?;
        let result = self.locked_update(&mut file, f);
        let _ = FileExt::unlock(&file);
        result
    }

    fn locked_update<T>(&self, file: &mut File, f: impl FnOnce(&mut Items) -> T) -> Result<T> {
        let mut s = String::new();
        file.read_to_string(&mut s)
            .with_context(|| format!("reading store {}", self.path.display()))?;
        let mut items: Items = if s.trim().is_empty() {
            Items::new()
        } else {
            match serde_json::from_str(&s) {
                Ok(items) => items,
                Err(e) => {
                    log::warn!("store {} is corrupt, starting empty: {}", self.path.display(), e);
                    Items::new()
                }
            }
        };
        let before = items.clone();
        let out = f(&mut items);
        if before != items {
            let s = serde_json::to_string_pretty(&items)?;
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(s.as_bytes())
                .with_context(|| format!("writing store {}", self.path.display()))?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn temp_store() -> DayStore {
        let dir = std::env::temp_dir().join(format!("askdoc-store-test-{}", uuid::Uuid::new_v4()));
        DayStore::open(dir.join("storage.json"), "askdoc")
    }

    #[test]
    fn missing_key_is_none() {
        let store = temp_store();
        assert_eq!(store.get("user", Local::now()).unwrap(), None);
    }

    #[test]
    fn value_survives_same_day() {
        let store = temp_store();
        let now = Local::now();
        store.set("user", "u-1", now).unwrap();
        assert_eq!(store.get("user", now).unwrap().as_deref(), Some("u-1"));
    }

    #[test]
    fn value_expires_next_day_and_is_removed() {
        let store = temp_store();
        let now = Local::now();
        store.set("user", "u-1", now).unwrap();
        let tomorrow = now + Duration::days(1);
        assert_eq!(store.get("user", tomorrow).unwrap(), None);
        // removed from disk, so even "today" it is gone now
        assert_eq!(store.get("user", now).unwrap(), None);
    }

    #[test]
    fn keys_are_namespaced_on_disk() {
        let store = temp_store();
        store.set("unionId", "abc", Local::now()).unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"askdoc.unionId\""));
    }

    #[test]
    fn end_of_day_is_after_now_and_same_date() {
        let now = Local::now();
        let eod = end_of_day(now);
        assert!(eod >= now);
        assert_eq!(eod.date_naive(), now.date_naive());
    }

    #[test]
    fn remove_deletes_key() {
        let store = temp_store();
        let now = Local::now();
        store.set("accessToken", "t", now).unwrap();
        store.remove("accessToken").unwrap();
        assert_eq!(store.get("accessToken", now).unwrap(), None);
    }
}
