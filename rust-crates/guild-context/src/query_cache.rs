use crate::guild::GuildId;
use chrono::{
    DateTime,
    Utc,
};
use itertools::Itertools;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        RwLock,
    },
};

pub const WALLET_BALANCE: &str = "wallet-balance";
pub const ACTIVE_BETS: &str = "active-bets";
pub const CLOSED_BETS: &str = "closed-bets";
pub const USER_PROFILE: &str = "user-profile";
pub const TRANSACTIONS: &str = "transactions";
pub const LEADERBOARDS: &str = "leaderboards";
pub const GUILD_MEMBERS: &str = "guild-members";
pub const USER_SEARCH: &str = "user-search";
pub const STATISTICS: &str = "statistics";
pub const DAILY_BONUS: &str = "daily-bonus";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryScope {
    /// Results depend on the bound guild and go stale on every switch.
    Guild,
    Global,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryFamily {
    pub name: String,
    pub scope: QueryScope,
}

impl QueryFamily {
    pub fn guild_scoped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: QueryScope::Guild,
        }
    }

    pub fn global(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: QueryScope::Global,
        }
    }
}

/// Cached query identity: family, guild it was fetched under and an optional
/// subject (user id, search term, ...).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub family: String,
    pub guild: Option<GuildId>,
    pub subject: Option<String>,
}

impl QueryKey {
    pub fn new(family: impl Into<String>, guild: Option<GuildId>) -> Self {
        Self {
            family: family.into(),
            guild,
            subject: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// Every query family the dashboard caches. Families declare their own
/// scope when they register, so the set refreshed on a guild switch follows
/// whatever has been registered instead of a hand-maintained list.
#[derive(Clone, Default)]
pub struct QueryRegistry {
    families: Arc<RwLock<HashMap<String, QueryFamily>>>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for name in [
            WALLET_BALANCE,
            ACTIVE_BETS,
            CLOSED_BETS,
            USER_PROFILE,
            TRANSACTIONS,
            LEADERBOARDS,
            GUILD_MEMBERS,
            USER_SEARCH,
            STATISTICS,
            DAILY_BONUS,
        ] {
            registry.register(QueryFamily::guild_scoped(name));
        }
        registry
    }

    /// Register `family`, replacing any family with the same name.
    pub fn register(&self, family: QueryFamily) {
        let mut families = self.families.write().unwrap_or_else(PoisonError::into_inner);
        families.insert(family.name.clone(), family);
    }

    pub fn family(&self, name: &str) -> Option<QueryFamily> {
        let families = self.families.read().unwrap_or_else(PoisonError::into_inner);
        families.get(name).cloned()
    }

    pub fn guild_scoped(&self) -> Vec<QueryFamily> {
        let families = self.families.read().unwrap_or_else(PoisonError::into_inner);
        families
            .values()
            .filter(|family| family.scope == QueryScope::Guild)
            .cloned()
            .sorted_by(|a, b| a.name.cmp(&b.name))
            .collect()
    }
}

pub trait QueryCache {
    /// Mark every cached entry of `family` stale; returns how many were hit.
    fn invalidate(&self, family: &str) -> impl Future<Output = crate::Result<usize>> + Send;

    /// Load `key` now and replace whatever is cached for it.
    fn refetch(&self, key: &QueryKey) -> impl Future<Output = crate::Result<()>> + Send;
}

pub trait QueryLoader {
    fn load(
        &self,
        key: &QueryKey,
    ) -> impl Future<Output = crate::Result<serde_json::Value>> + Send;
}

#[derive(Clone, Debug, PartialEq)]
pub struct CachedQuery {
    pub value: serde_json::Value,
    pub stale: bool,
    pub fetched_at: DateTime<Utc>,
}

/// Client-side query cache. Stale entries are reloaded on their next
/// [`InMemoryQueryCache::fetch`]; [`QueryCache::refetch`] reloads right away.
#[derive(Clone)]
pub struct InMemoryQueryCache<L> {
    entries: Arc<Mutex<HashMap<QueryKey, CachedQuery>>>,
    loader: L,
}

impl<L> InMemoryQueryCache<L> {
    pub fn new(loader: L) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            loader,
        }
    }

    pub fn get(&self, key: &QueryKey) -> Option<CachedQuery> {
        self.lock().get(key).cloned()
    }

    pub fn insert(&self, key: QueryKey, value: serde_json::Value) {
        let entry = CachedQuery {
            value,
            stale: false,
            fetched_at: Utc::now(),
        };
        self.lock().insert(key, entry);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, CachedQuery>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<L: QueryLoader> InMemoryQueryCache<L> {
    /// Cached value when fresh, otherwise load and cache it.
    pub async fn fetch(&self, key: &QueryKey) -> crate::Result<serde_json::Value> {
        if let Some(entry) = self.get(key)
            && !entry.stale
        {
            return Ok(entry.value);
        }
        let value = self.loader.load(key).await?;
        self.insert(key.clone(), value.clone());
        Ok(value)
    }
}

impl<L: QueryLoader + Send + Sync> QueryCache for InMemoryQueryCache<L> {
    async fn invalidate(&self, family: &str) -> crate::Result<usize> {
        let mut entries = self.lock();
        let mut hits = 0;
        for (key, entry) in entries.iter_mut() {
            if key.family == family {
                entry.stale = true;
                hits += 1;
            }
        }
        Ok(hits)
    }

    async fn refetch(&self, key: &QueryKey) -> crate::Result<()> {
        let value = self.loader.load(key).await?;
        self.insert(key.clone(), value);
        Ok(())
    }
}
