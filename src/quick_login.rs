use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

use crate::clock::Clock;
use crate::config::RelayConfig;
use crate::error::Error;
use crate::storage::{KeyValueStore, read_record_value, write_record};
use crate::types::{Identity, UserId};

/// A previously signed-in identity offered for one-tap re-login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedUser {
    pub id: UserId,
    pub email: String,
    pub full_name: String,
    pub role: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_sign_in_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl CachedUser {
    /// Builds an entry from an authenticated identity. `last_sign_in_at` is
    /// overwritten by [`QuickLoginCache::save`].
    #[must_use]
    pub fn from_identity(
        identity: &Identity,
        full_name: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            id: identity.id.clone(),
            email: identity.email.clone(),
            full_name: full_name.into(),
            role: role.into(),
            last_sign_in_at: OffsetDateTime::UNIX_EPOCH,
            avatar_url: None,
        }
    }

    #[must_use]
    pub fn with_avatar_url(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }
}

/// Bounded, newest-first list of recent identities in local storage.
pub struct QuickLoginCache {
    storage: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    key: String,
    capacity: usize,
    ttl: time::Duration,
}

impl QuickLoginCache {
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, config: &RelayConfig) -> Self {
        Self {
            storage,
            clock,
            key: config.storage_keys().quick_login(),
            capacity: config.quick_login_capacity,
            ttl: time::Duration::try_from(config.quick_login_ttl).unwrap_or(time::Duration::MAX),
        }
    }

    /// Moves `user` to the front stamped with the current time, evicting the
    /// oldest entries beyond capacity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the list cannot be written.
    pub fn save(&self, mut user: CachedUser) -> Result<(), Error> {
        user.last_sign_in_at = self.clock.now();
        let mut users = self.list();
        users.retain(|u| u.id != user.id);
        users.insert(0, user);
        users.truncate(self.capacity);
        write_record(self.storage.as_ref(), &self.key, &users)
    }

    /// All well-formed entries, newest first. Malformed entries are skipped.
    #[must_use]
    pub fn list(&self) -> Vec<CachedUser> {
        let Some(JsonValue::Array(items)) = read_record_value(self.storage.as_ref(), &self.key)
        else {
            return Vec::new();
        };
        let mut users: Vec<CachedUser> = items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<CachedUser>(item) {
                Ok(user) => Some(user),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping malformed quick-login entry");
                    None
                }
            })
            .collect();
        users.sort_by(|a, b| b.last_sign_in_at.cmp(&a.last_sign_in_at));
        users
    }

    /// Entries still inside the validity window, newest first.
    #[must_use]
    pub fn usable(&self) -> Vec<CachedUser> {
        self.list().into_iter().filter(|u| self.is_valid(u)).collect()
    }

    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the list cannot be written.
    pub fn remove(&self, id: &UserId) -> Result<(), Error> {
        let mut users = self.list();
        let before = users.len();
        users.retain(|u| &u.id != id);
        if users.len() == before {
            return Ok(());
        }
        write_record(self.storage.as_ref(), &self.key, &users)
    }

    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the record cannot be deleted.
    pub fn clear(&self) -> Result<(), Error> {
        self.storage.remove(&self.key)
    }

    #[must_use]
    pub fn has_any(&self) -> bool {
        !self.list().is_empty()
    }

    /// Required fields present and last sign-in within the validity window.
    #[must_use]
    pub fn is_valid(&self, user: &CachedUser) -> bool {
        if user.id.0.is_empty() || user.email.is_empty() {
            return false;
        }
        self.clock.now() - user.last_sign_in_at < self.ttl
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;

    fn cache() -> (QuickLoginCache, Arc<ManualClock>, MemoryStore) {
        let storage = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(datetime!(2024-03-01 09:00 UTC)));
        let cache = QuickLoginCache::new(
            Arc::new(storage.clone()),
            clock.clone(),
            &RelayConfig::default(),
        );
        (cache, clock, storage)
    }

    fn user(id: &str) -> CachedUser {
        CachedUser::from_identity(
            &Identity::new(id, format!("{id}@example.com")),
            format!("User {id}"),
            "member",
        )
    }

    fn ids(users: &[CachedUser]) -> Vec<&str> {
        users.iter().map(|u| u.id.0.as_str()).collect()
    }

    #[test]
    fn save_prepends_and_stamps() {
        let (cache, clock, _) = cache();
        cache.save(user("a")).unwrap();
        clock.advance(time::Duration::minutes(1));
        cache.save(user("b")).unwrap();

        let users = cache.list();
        assert_eq!(ids(&users), ["b", "a"]);
        assert_eq!(users[0].last_sign_in_at, datetime!(2024-03-01 09:01 UTC));
        assert!(cache.has_any());
    }

    #[test]
    fn sixth_entry_evicts_oldest() {
        let (cache, clock, _) = cache();
        for id in ["1", "2", "3", "4", "5", "6"] {
            cache.save(user(id)).unwrap();
            clock.advance(time::Duration::seconds(1));
        }
        assert_eq!(ids(&cache.list()), ["6", "5", "4", "3", "2"]);
    }

    #[test]
    fn saving_existing_id_reorders_without_duplicate() {
        let (cache, clock, _) = cache();
        for id in ["a", "b", "c"] {
            cache.save(user(id)).unwrap();
            clock.advance(time::Duration::seconds(1));
        }
        cache.save(user("a").with_avatar_url("https://cdn/a.png")).unwrap();

        let users = cache.list();
        assert_eq!(ids(&users), ["a", "c", "b"]);
        assert_eq!(users[0].avatar_url.as_deref(), Some("https://cdn/a.png"));
        assert_eq!(users[0].last_sign_in_at, datetime!(2024-03-01 09:00:03 UTC));
    }

    #[test]
    fn remove_and_clear() {
        let (cache, _, storage) = cache();
        cache.save(user("a")).unwrap();
        cache.save(user("b")).unwrap();

        cache.remove(&UserId::from("a")).unwrap();
        cache.remove(&UserId::from("missing")).unwrap();
        assert_eq!(ids(&cache.list()), ["b"]);

        cache.clear().unwrap();
        cache.clear().unwrap();
        assert!(!cache.has_any());
        assert!(storage.is_empty());
    }

    #[test]
    fn validity_window_is_thirty_days() {
        let (cache, clock, _) = cache();
        let now = clock.now();
        let mut entry = user("a");

        entry.last_sign_in_at = now - time::Duration::days(29);
        assert!(cache.is_valid(&entry));

        entry.last_sign_in_at = now - time::Duration::days(31);
        assert!(!cache.is_valid(&entry));
    }

    #[test]
    fn entries_missing_required_fields_are_invalid() {
        let (cache, clock, _) = cache();
        let mut entry = user("a");
        entry.last_sign_in_at = clock.now();
        entry.email.clear();
        assert!(!cache.is_valid(&entry));
    }

    #[test]
    fn usable_filters_expired_entries() {
        let (cache, clock, _) = cache();
        cache.save(user("old")).unwrap();
        clock.advance(time::Duration::days(20));
        cache.save(user("new")).unwrap();
        clock.advance(time::Duration::days(15));

        assert_eq!(ids(&cache.list()), ["new", "old"]);
        assert_eq!(ids(&cache.usable()), ["new"]);
    }

    #[test]
    fn malformed_entries_are_dropped_individually() {
        let (cache, _, storage) = cache();
        storage
            .set(
                "signin-relay.quick-login",
                r#"{"version":1,"data":[
                    {"id":"ok","email":"ok@x","full_name":"Ok","role":"member","last_sign_in_at":"2024-03-01T08:00:00Z"},
                    {"id":"broken","email":42}
                ]}"#
                .into(),
            )
            .unwrap();
        assert_eq!(ids(&cache.list()), ["ok"]);
    }

    #[test]
    fn legacy_unversioned_list_reads_as_empty() {
        let (cache, _, storage) = cache();
        storage
            .set("signin-relay.quick-login", r#"[{"id":"a"}]"#.into())
            .unwrap();
        assert!(cache.list().is_empty());
        assert!(!cache.has_any());
    }
}
