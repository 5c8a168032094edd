//! Provider accounts, rotation, and the per-account link cache.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tracing::{info, warn};

use crate::model::DownloadLink;

/// One provider account.
pub struct Account {
    /// Stable index; doubles as `account_id` on issued links.
    pub id: usize,
    /// Rotation order, lowest first.
    pub order: usize,
    /// API token.
    pub token: String,
    disabled: AtomicBool,
    username: Mutex<String>,
    traffic_used: AtomicU64,
    links: Mutex<HashMap<String, DownloadLink>>,
}

impl Account {
    fn new(id: usize, token: String) -> Self {
        Self {
            id,
            order: id,
            token,
            disabled: AtomicBool::new(false),
            username: Mutex::new(String::new()),
            traffic_used: AtomicU64::new(0),
            links: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the account can issue links.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.disabled.load(Ordering::Acquire)
    }

    /// Record profile data from a refresh.
    pub fn record_profile(&self, username: &str, traffic_used: u64) {
        *self.username.lock().expect("account lock") = username.to_owned();
        self.traffic_used.store(traffic_used, Ordering::Release);
    }

    /// Cached link for a cache key, dropped when unusable.
    #[must_use]
    pub fn cached_link(&self, key: &str) -> Option<DownloadLink> {
        let mut links = self.links.lock().expect("account lock");
        match links.get(key) {
            Some(link) if link.is_usable() => Some(link.clone()),
            Some(_) => {
                links.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a resolved link under its cache key.
    pub fn cache_link(&self, key: &str, link: DownloadLink) {
        self.links
            .lock()
            .expect("account lock")
            .insert(key.to_owned(), link);
    }

    /// Drop one cached link.
    pub fn evict_link(&self, key: &str) {
        self.links.lock().expect("account lock").remove(key);
    }

    /// Drop every cached link, returning how many were held.
    pub fn clear_links(&self) -> usize {
        let mut links = self.links.lock().expect("account lock");
        let count = links.len();
        links.clear();
        count
    }
}

/// Ordered account collection with a `current` pointer.
pub struct Accounts {
    accounts: Vec<Account>,
    current: AtomicUsize,
}

impl Accounts {
    /// Build accounts from tokens, in rotation order.
    #[must_use]
    pub fn new(tokens: Vec<String>) -> Self {
        let accounts = tokens
            .into_iter()
            .filter(|token| !token.is_empty())
            .enumerate()
            .map(|(id, token)| Account::new(id, token))
            .collect();
        Self {
            accounts,
            current: AtomicUsize::new(0),
        }
    }

    /// The active account, or `None` when every account is disabled.
    #[must_use]
    pub fn current(&self) -> Option<&Account> {
        let start = self.current.load(Ordering::Acquire);
        let len = self.accounts.len();
        (0..len)
            .map(|offset| &self.accounts[(start + offset) % len])
            .find(|account| account.is_enabled())
    }

    /// All accounts, for profile refreshes.
    #[must_use]
    pub fn all(&self) -> &[Account] {
        &self.accounts
    }

    /// Look an account up by id.
    #[must_use]
    pub fn by_id(&self, id: usize) -> Option<&Account> {
        self.accounts.get(id)
    }

    /// Disable an account and advance the pointer to the next enabled one.
    pub fn disable(&self, id: usize) {
        let Some(account) = self.accounts.get(id) else {
            return;
        };
        account.disabled.store(true, Ordering::Release);
        let next = self
            .accounts
            .iter()
            .cycle()
            .skip(id + 1)
            .take(self.accounts.len())
            .find(|candidate| candidate.is_enabled());
        match next {
            Some(candidate) => {
                self.current.store(candidate.id, Ordering::Release);
                info!(disabled = id, current = candidate.id, "account rotated");
            }
            None => {
                warn!(disabled = id, "no enabled account remains");
            }
        }
    }

    /// Number of configured accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Whether no accounts are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn link(account_id: usize, expires_in_secs: i64) -> DownloadLink {
        DownloadLink {
            id: "dl".into(),
            token: String::new(),
            link: "https://restricted/a".into(),
            download_link: "https://direct/a".into(),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
            account_id,
        }
    }

    #[test]
    fn disabling_advances_the_current_pointer() {
        let accounts = Accounts::new(vec!["t0".into(), "t1".into(), "t2".into()]);
        assert_eq!(accounts.current().expect("enabled").id, 0);

        accounts.disable(0);
        assert_eq!(accounts.current().expect("enabled").id, 1);

        accounts.disable(1);
        assert_eq!(accounts.current().expect("enabled").id, 2);

        accounts.disable(2);
        assert!(accounts.current().is_none());
    }

    #[test]
    fn expired_links_are_dropped_on_read() {
        let accounts = Accounts::new(vec!["t0".into()]);
        let account = accounts.current().expect("enabled");
        account.cache_link("key", link(0, -10));
        assert!(account.cached_link("key").is_none());

        account.cache_link("key", link(0, 3_600));
        assert!(account.cached_link("key").is_some());
    }

    #[test]
    fn clear_links_reports_the_count() {
        let accounts = Accounts::new(vec!["t0".into()]);
        let account = accounts.current().expect("enabled");
        account.cache_link("a", link(0, 3_600));
        account.cache_link("b", link(0, 3_600));
        assert_eq!(account.clear_links(), 2);
        assert!(account.cached_link("a").is_none());
    }
}
