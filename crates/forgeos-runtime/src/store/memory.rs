use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{CoordinationStore, ReleaseOutcome, SetOutcome, StoreError};

struct Entry {
    value:      String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Default)]
struct Inner {
    values: HashMap<String, Entry>,
    sets:   HashMap<String, BTreeSet<String>>,
    closed: bool,
}

impl Inner {
    fn live_value(&mut self, key: &str) -> Option<&String> {
        let now = Instant::now();
        if self.values.get(key).is_some_and(|e| !e.is_live(now)) {
            self.values.remove(key);
        }
        self.values.get(key).map(|e| &e.value)
    }
}

/// Process-local coordination store. Expired keys are dropped when touched.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn open(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.closed {
            return Err(StoreError::Closed);
        }
        Ok(guard)
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<SetOutcome, StoreError> {
        let mut inner = self.open()?;
        if inner.live_value(key).is_some() {
            return Ok(SetOutcome::Exists);
        }
        inner.values.insert(
            key.to_owned(),
            Entry { value: value.to_owned(), expires_at: Some(Instant::now() + ttl) },
        );
        Ok(SetOutcome::Acquired)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<ReleaseOutcome, StoreError> {
        let mut inner = self.open()?;
        if inner.live_value(key).map(String::as_str) != Some(expected) {
            return Ok(ReleaseOutcome::Noop);
        }
        inner.values.remove(key);
        Ok(ReleaseOutcome::Released)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.open()?.live_value(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.open()?
            .values
            .insert(key.to_owned(), Entry { value: value.to_owned(), expires_at: None });
        Ok(())
    }

    async fn compare_and_set(&self, key: &str, expected: &str, value: &str) -> Result<bool, StoreError> {
        let mut inner = self.open()?;
        if inner.live_value(key).map(String::as_str) != Some(expected) {
            return Ok(false);
        }
        inner
            .values
            .insert(key.to_owned(), Entry { value: value.to_owned(), expires_at: None });
        Ok(true)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        let mut inner = self.open()?;
        Ok(keys.iter().map(|k| inner.live_value(k).cloned()).collect())
    }

    async fn sadd(&self, set: &str, member: &str) -> Result<(), StoreError> {
        self.open()?
            .sets
            .entry(set.to_owned())
            .or_default()
            .insert(member.to_owned());
        Ok(())
    }

    async fn srem(&self, set: &str, member: &str) -> Result<(), StoreError> {
        let mut inner = self.open()?;
        if let Some(members) = inner.sets.get_mut(set) {
            members.remove(member);
            if members.is_empty() {
                inner.sets.remove(set);
            }
        }
        Ok(())
    }

    async fn smembers(&self, set: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .open()?
            .sets
            .get(set)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_wallet(
        &self,
        state_key: &str,
        state_json: &str,
        known_set: &str,
        running_set: &str,
        shard: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.open()?;
        inner.values.insert(
            state_key.to_owned(),
            Entry { value: state_json.to_owned(), expires_at: None },
        );
        inner.sets.entry(known_set.to_owned()).or_default().insert(shard.to_owned());
        inner.sets.entry(running_set.to_owned()).or_default().insert(shard.to_owned());
        Ok(())
    }

    async fn stop_wallet(
        &self,
        state_key: &str,
        expected: &str,
        state_json: &str,
        running_set: &str,
        shard: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.open()?;
        if inner.live_value(state_key).map(String::as_str) != Some(expected) {
            return Ok(false);
        }
        inner.values.insert(
            state_key.to_owned(),
            Entry { value: state_json.to_owned(), expires_at: None },
        );
        if let Some(members) = inner.sets.get_mut(running_set) {
            members.remove(shard);
        }
        Ok(true)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_absent_is_exclusive() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(30);
        assert_eq!(store.set_if_absent("lock", "a", ttl).await.unwrap(), SetOutcome::Acquired);
        assert_eq!(store.set_if_absent("lock", "b", ttl).await.unwrap(), SetOutcome::Exists);
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_can_be_reacquired_and_stale_release_is_noop() {
        let store = MemoryStore::new();
        let ttl = Duration::from_millis(30_000);
        store.set_if_absent("lock", "owner-a", ttl).await.unwrap();

        tokio::time::advance(Duration::from_millis(30_001)).await;
        assert_eq!(store.get("lock").await.unwrap(), None);
        assert_eq!(store.set_if_absent("lock", "owner-b", ttl).await.unwrap(), SetOutcome::Acquired);

        assert_eq!(store.compare_and_delete("lock", "owner-a").await.unwrap(), ReleaseOutcome::Noop);
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("owner-b"));

        assert_eq!(store.compare_and_delete("lock", "owner-b").await.unwrap(), ReleaseOutcome::Released);
        assert_eq!(store.get("lock").await.unwrap(), None);
        assert_eq!(store.compare_and_delete("lock", "owner-b").await.unwrap(), ReleaseOutcome::Noop);
    }

    #[tokio::test]
    async fn sets_and_multi_get() {
        let store = MemoryStore::new();
        store.sadd("running", "b").await.unwrap();
        store.sadd("running", "a").await.unwrap();
        store.sadd("running", "a").await.unwrap();
        assert_eq!(store.smembers("running").await.unwrap(), vec!["a", "b"]);

        store.srem("running", "a").await.unwrap();
        store.srem("missing", "a").await.unwrap();
        assert_eq!(store.smembers("running").await.unwrap(), vec!["b"]);

        store.set("k1", "v1").await.unwrap();
        let values = store.mget(&["k1".into(), "k2".into()]).await.unwrap();
        assert_eq!(values, vec![Some("v1".to_owned()), None]);
    }

    #[tokio::test]
    async fn wallet_upsert_and_stop_touch_state_and_sets() {
        let store = MemoryStore::new();
        store.upsert_wallet("state:x", "{}", "known", "running", "x").await.unwrap();
        assert_eq!(store.smembers("known").await.unwrap(), vec!["x"]);
        assert_eq!(store.smembers("running").await.unwrap(), vec!["x"]);

        let stopped = "{\"running\":false}";
        assert!(!store.stop_wallet("state:x", "{\"cycles\":1}", stopped, "running", "x").await.unwrap());
        assert_eq!(store.smembers("running").await.unwrap(), vec!["x"]);
        assert_eq!(store.get("state:x").await.unwrap().as_deref(), Some("{}"));

        assert!(store.stop_wallet("state:x", "{}", stopped, "running", "x").await.unwrap());
        assert_eq!(store.smembers("known").await.unwrap(), vec!["x"]);
        assert!(store.smembers("running").await.unwrap().is_empty());
        assert_eq!(store.get("state:x").await.unwrap().as_deref(), Some("{\"running\":false}"));
    }

    #[tokio::test]
    async fn compare_and_set_only_replaces_expected_value() {
        let store = MemoryStore::new();
        assert!(!store.compare_and_set("k", "v0", "v1").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v0").await.unwrap();
        assert!(!store.compare_and_set("k", "other", "v1").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v0"));

        assert!(store.compare_and_set("k", "v0", "v1").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn closed_store_rejects_operations() {
        let store = MemoryStore::new();
        store.close().await.unwrap();
        assert_eq!(store.get("k").await.unwrap_err(), StoreError::Closed);
        assert_eq!(store.smembers("s").await.unwrap_err(), StoreError::Closed);
    }
}
