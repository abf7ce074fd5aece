//! Session identity: the `user` string sent with every chat request.
//!
//! A continuing topic uses `<unionId><YYYYMMDD>`; a new topic uses `<unionId>.<epoch ms>`.
//! The context is computed once and passed explicitly; it carries its own expiry.

use anyhow::Result;
use chrono::{DateTime, Local, Utc};

use crate::store::{self, DayStore};

pub const USER_KEY: &str = "user";
pub const UNION_ID_KEY: &str = "unionId";
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Identity for the current day: who we are and how we authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub user: String,
    pub union_id: String,
    pub access_token: Option<String>,
    pub expires_at: DateTime<Local>,
}

impl SessionContext {
    /// Value for the Authorization header. A missing token is sent as `Bearer null`.
    pub fn authorization(&self) -> String {
        match self.access_token.as_deref() {
            Some(token) => format!("Bearer {}", token),
            None => "Bearer null".to_string(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Local>) -> bool {
        now > self.expires_at
    }
}

/// `<unionId><YYYYMMDD>` (UTC date).
pub fn daily_user(union_id: &str, now: DateTime<Local>) -> String {
    format!("{}{}", union_id, now.with_timezone(&Utc).format("%Y%m%d"))
}

/// `<unionId>.<epoch ms>`.
pub fn session_user(union_id: &str, now: DateTime<Local>) -> String {
    format!("{}.{}", union_id, now.timestamp_millis())
}

/// Derives and persists [`SessionContext`] values through a [`DayStore`].
#[derive(Debug, Clone)]
pub struct IdentityStore {
    store: DayStore,
}

impl IdentityStore {
    pub fn new(store: DayStore) -> Self {
        Self { store }
    }

    /// Build the context for `now`. `access_token` (from config/env) wins over the stored one.
    pub fn load(&self, now: DateTime<Local>, access_token: Option<String>) -> Result<SessionContext> {
        let union_id = match self.store.get(UNION_ID_KEY, now)?.filter(|s| !s.is_empty()) {
            Some(id) => id,
            None => {
                let id = uuid::Uuid::new_v4().simple().to_string();
                self.store.set(UNION_ID_KEY, &id, now)?;
                log::info!("generated anonymous id {}", id);
                id
            }
        };
        let user = self
            .store
            .get(USER_KEY, now)?
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| daily_user(&union_id, now));
        let access_token = match access_token {
            Some(t) => Some(t),
            None => self.store.get(ACCESS_TOKEN_KEY, now)?.filter(|s| !s.is_empty()),
        };
        if access_token.is_none() {
            log::warn!("no access token configured; requests will carry `Bearer null`");
        }
        Ok(SessionContext {
            user,
            union_id,
            access_token,
            expires_at: store::end_of_day(now),
        })
    }

    /// Start a fresh session user for a new topic and persist it.
    pub fn new_topic(&self, current: &SessionContext, now: DateTime<Local>) -> Result<SessionContext> {
        let user = session_user(&current.union_id, now);
        self.store.set(USER_KEY, &user, now)?;
        log::debug!("new topic user {}", user);
        Ok(SessionContext {
            user,
            expires_at: store::end_of_day(now),
            ..current.clone()
        })
    }

    /// Persist an access token for today.
    pub fn set_access_token(&self, token: &str, now: DateTime<Local>) -> Result<()> {
        self.store.set(ACCESS_TOKEN_KEY, token.trim(), now)
    }

    /// Forget the stored access token; later loads fall back to config/env or `Bearer null`.
    pub fn clear_access_token(&self) -> Result<()> {
        self.store.remove(ACCESS_TOKEN_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn temp_identity() -> IdentityStore {
        let dir = std::env::temp_dir().join(format!("askdoc-identity-test-{}", uuid::Uuid::new_v4()));
        IdentityStore::new(DayStore::open(dir.join("storage.json"), "askdoc"))
    }

    #[test]
    fn load_generates_and_keeps_union_id() {
        let ids = temp_identity();
        let now = Local::now();
        let first = ids.load(now, None).unwrap();
        let second = ids.load(now, None).unwrap();
        assert!(!first.union_id.is_empty());
        assert_eq!(first.union_id, second.union_id);
        assert_eq!(first.user, daily_user(&first.union_id, now));
    }

    #[test]
    fn union_id_lasts_one_day() {
        let ids = temp_identity();
        let now = Local::now();
        let today = ids.load(now, None).unwrap();
        let tomorrow = now + Duration::days(1);
        let next = ids.load(tomorrow, None).unwrap();
        assert_ne!(next.union_id, today.union_id);
        assert_eq!(next.user, daily_user(&next.union_id, tomorrow));
    }

    #[test]
    fn daily_user_uses_utc_date() {
        let now = Utc
            .with_ymd_and_hms(2024, 3, 9, 12, 0, 0)
            .unwrap()
            .with_timezone(&Local);
        assert_eq!(daily_user("abc", now), "abc20240309");
    }

    #[test]
    fn new_topic_persists_session_user() {
        let ids = temp_identity();
        let now = Local::now();
        let ctx = ids.load(now, None).unwrap();
        let later = now + Duration::milliseconds(5);
        let fresh = ids.new_topic(&ctx, later).unwrap();
        assert_eq!(fresh.user, format!("{}.{}", ctx.union_id, later.timestamp_millis()));
        assert_eq!(fresh.union_id, ctx.union_id);
        let reloaded = ids.load(later, None).unwrap();
        assert_eq!(reloaded.user, fresh.user);
    }

    #[test]
    fn authorization_header_value() {
        let ids = temp_identity();
        let now = Local::now();
        let anon = ids.load(now, None).unwrap();
        assert_eq!(anon.authorization(), "Bearer null");

        ids.set_access_token("tok-1", now).unwrap();
        assert_eq!(ids.load(now, None).unwrap().authorization(), "Bearer tok-1");
        assert_eq!(
            ids.load(now, Some("env-tok".into())).unwrap().authorization(),
            "Bearer env-tok"
        );

        ids.clear_access_token().unwrap();
        assert_eq!(ids.load(now, None).unwrap().authorization(), "Bearer null");
    }

    #[test]
    fn context_expires_after_midnight() {
        let ids = temp_identity();
        let now = Local::now();
        let ctx = ids.load(now, None).unwrap();
        assert!(!ctx.is_expired(now));
        assert!(ctx.is_expired(now + Duration::days(1)));
    }
}
