//! Refreshes guild-scoped cached queries once a switch resolves.
use crate::{
    context::{
        GuildContextHandle,
        SwitchCompleted,
    },
    guild::GuildId,
    loading::{
        LoadingKey,
        LoadingTracker,
    },
    query_cache::{
        QueryCache,
        QueryKey,
        QueryRegistry,
        USER_PROFILE,
        WALLET_BALANCE,
    },
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{
    debug,
    info,
    warn,
};

/// Families reloaded right away after a switch instead of waiting for their
/// next read.
const EAGER_REFETCH: [&str; 2] = [USER_PROFILE, WALLET_BALANCE];

#[derive(Clone)]
pub struct CacheInvalidationBridge<C> {
    registry: QueryRegistry,
    cache: C,
    loading: LoadingTracker,
    context: GuildContextHandle,
    user_id: String,
}

impl<C: QueryCache + Clone + Send + Sync + 'static> CacheInvalidationBridge<C> {
    pub fn new(
        registry: QueryRegistry,
        cache: C,
        loading: LoadingTracker,
        context: GuildContextHandle,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            cache,
            loading,
            context,
            user_id: user_id.into(),
        }
    }

    /// Consume switch completions until the context shuts down.
    pub fn spawn(
        self,
        mut completions: mpsc::UnboundedReceiver<SwitchCompleted>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = completions.recv().await {
                debug!(guild = %event.guild, resolution = ?event.resolution, "switch completed");
                self.on_switch_completed(&event.guild, &self.user_id).await;
            }
            debug!("cache invalidation bridge stopped");
        })
    }

    /// Mark every guild-scoped family stale, then reload the profile and
    /// wallet for `user` in `guild`. Failures are logged and recorded under
    /// the family's query loading key.
    ///
    /// Returns `false` without touching the cache when a newer switch has
    /// started since, so `guild` is no longer the settled selection.
    pub async fn on_switch_completed(&self, guild: &GuildId, user: &str) -> bool {
        let snapshot = self.context.snapshot();
        if snapshot.is_switching() || snapshot.selected.as_ref() != Some(guild) {
            debug!(
                %guild,
                selected = ?snapshot.selected,
                pending = ?snapshot.pending,
                "skipping refresh for a superseded switch"
            );
            return false;
        }

        let families = self.registry.guild_scoped();
        for family in &families {
            if let Err(err) = self.cache.invalidate(&family.name).await {
                warn!(family = %family.name, "failed to invalidate: {err:#}");
            }
        }
        info!(%guild, families = families.len(), "invalidated guild-scoped queries");

        let [profile, wallet] =
            EAGER_REFETCH.map(|family| QueryKey::new(family, Some(guild.clone())).with_subject(user));
        let (profile, wallet) = futures::join!(self.refetch(&profile), self.refetch(&wallet));
        if profile.is_err() || wallet.is_err() {
            debug!(%guild, "eager refetch after switch did not fully succeed");
        }
        true
    }

    /// Invalidate `families` after a mutation elsewhere in the app. Skipped
    /// while a switch is in flight; its completion refreshes everything.
    pub async fn invalidate_after_mutation(&self, families: &[&str]) -> bool {
        if self.context.is_switching() {
            debug!(?families, "skipping mutation invalidation during guild switch");
            return false;
        }
        for family in families {
            if let Err(err) = self.cache.invalidate(family).await {
                warn!(%family, "failed to invalidate: {err:#}");
            }
        }
        true
    }

    async fn refetch(&self, key: &QueryKey) -> crate::Result<()> {
        self.loading
            .with_loading(LoadingKey::query(&key.family), || self.cache.refetch(key))
            .await
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        context::GuildContext,
        header_binder::HeaderBinder,
        preferences::in_memory::InMemoryPreferenceStore,
        query_cache::{
            ACTIVE_BETS,
            QueryFamily,
        },
    };
    use anyhow::anyhow;
    use std::{
        collections::HashSet,
        sync::{
            Arc,
            Mutex,
        },
        time::Duration,
    };
    use tokio::time;

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Call {
        Invalidate(String),
        Refetch(QueryKey),
    }

    #[derive(Clone, Default)]
    struct RecordingCache {
        calls: Arc<Mutex<Vec<Call>>>,
        failing: Arc<Mutex<HashSet<String>>>,
    }

    impl RecordingCache {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn fail_refetch_of(&self, family: &str) {
            self.failing.lock().unwrap().insert(family.to_string());
        }
    }

    impl QueryCache for RecordingCache {
        async fn invalidate(&self, family: &str) -> crate::Result<usize> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Invalidate(family.to_string()));
            Ok(1)
        }

        async fn refetch(&self, key: &QueryKey) -> crate::Result<()> {
            self.calls.lock().unwrap().push(Call::Refetch(key.clone()));
            if self.failing.lock().unwrap().contains(&key.family) {
                return Err(anyhow!("{} unavailable", key.family));
            }
            Ok(())
        }
    }

    struct Harness {
        bridge: CacheInvalidationBridge<RecordingCache>,
        cache: RecordingCache,
        loading: LoadingTracker,
        context: GuildContextHandle,
        completions: mpsc::UnboundedReceiver<SwitchCompleted>,
    }

    fn harness(registry: QueryRegistry) -> Harness {
        let loading = LoadingTracker::new();
        let (context, completions) = GuildContext::spawn(
            InMemoryPreferenceStore::new(),
            HeaderBinder::new(),
            loading.clone(),
            Duration::from_millis(5_000),
        );
        let cache = RecordingCache::default();
        let bridge = CacheInvalidationBridge::new(
            registry,
            cache.clone(),
            loading.clone(),
            context.clone(),
            "user-1",
        );
        Harness {
            bridge,
            cache,
            loading,
            context,
            completions,
        }
    }

    async fn settle_on(context: &GuildContextHandle, guild: &str) {
        context.select_guild(guild).await;
        assert!(context.complete_switch().await);
    }

    fn refetched(calls: &[Call]) -> Vec<QueryKey> {
        calls
            .iter()
            .filter_map(|call| match call {
                Call::Refetch(key) => Some(key.clone()),
                Call::Invalidate(_) => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn on_switch_completed__invalidates_guild_families_then_refetches_profile_and_wallet() {
        // given
        let registry = QueryRegistry::with_defaults();
        registry.register(QueryFamily::global("announcements"));
        let harness = harness(registry);
        let guild = GuildId::new("g2");
        settle_on(&harness.context, "g2").await;

        // when
        let refreshed = harness.bridge.on_switch_completed(&guild, "user-1").await;

        // then
        assert!(refreshed);
        let calls = harness.cache.calls();
        assert_eq!(calls.len(), 12);
        assert!(calls[..10].iter().all(|call| matches!(call, Call::Invalidate(_))));
        assert!(!calls.contains(&Call::Invalidate("announcements".to_string())));
        let mut refetched = refetched(&calls);
        refetched.sort_by(|a, b| a.family.cmp(&b.family));
        assert_eq!(
            refetched,
            vec![
                QueryKey::new(USER_PROFILE, Some(guild.clone())).with_subject("user-1"),
                QueryKey::new(WALLET_BALANCE, Some(guild)).with_subject("user-1"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn on_switch_completed__records_refetch_failure_without_propagating() {
        // given
        let harness = harness(QueryRegistry::with_defaults());
        harness.cache.fail_refetch_of(WALLET_BALANCE);
        settle_on(&harness.context, "g2").await;

        // when
        harness
            .bridge
            .on_switch_completed(&GuildId::new("g2"), "user-1")
            .await;

        // then
        let wallet_key = LoadingKey::query(WALLET_BALANCE);
        let error = harness.loading.error(&wallet_key).unwrap();
        assert_eq!(error.message, "wallet-balance unavailable");
        assert!(!harness.loading.is_loading(&wallet_key));
        assert!(harness.loading.error(&LoadingKey::query(USER_PROFILE)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn on_switch_completed__skipped_while_a_newer_switch_is_pending() {
        // given
        let harness = harness(QueryRegistry::with_defaults());
        settle_on(&harness.context, "a").await;
        harness.context.select_guild("b").await;

        // when
        let refreshed = harness
            .bridge
            .on_switch_completed(&GuildId::new("a"), "user-1")
            .await;

        // then
        assert!(!refreshed);
        assert!(harness.cache.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn on_switch_completed__skipped_for_a_guild_that_is_no_longer_selected() {
        // given
        let harness = harness(QueryRegistry::with_defaults());
        settle_on(&harness.context, "a").await;
        settle_on(&harness.context, "b").await;

        // when
        let refreshed = harness
            .bridge
            .on_switch_completed(&GuildId::new("a"), "user-1")
            .await;

        // then
        assert!(!refreshed);
        assert!(harness.cache.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn spawn__queued_completion_superseded_by_a_newer_select_is_ignored() {
        // given
        let Harness {
            bridge,
            cache,
            context,
            completions,
            ..
        } = harness(QueryRegistry::with_defaults());
        settle_on(&context, "a").await;
        context.select_guild("b").await;

        // when
        let _task = bridge.spawn(completions);
        time::sleep(Duration::from_millis(10)).await;

        // then
        assert!(context.is_switching());
        assert!(cache.calls().is_empty());

        context.complete_switch().await;
        time::sleep(Duration::from_millis(10)).await;
        let refetched = refetched(&cache.calls());
        assert_eq!(refetched.len(), 2);
        assert!(
            refetched
                .iter()
                .all(|key| key.guild == Some(GuildId::new("b")))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_after_mutation__skipped_while_switching() {
        // given
        let harness = harness(QueryRegistry::with_defaults());
        harness.context.select_guild("g2").await;

        // when
        let during = harness.bridge.invalidate_after_mutation(&[ACTIVE_BETS]).await;
        harness.context.complete_switch().await;
        let after = harness.bridge.invalidate_after_mutation(&[ACTIVE_BETS]).await;

        // then
        assert!(!during);
        assert!(after);
        assert_eq!(
            harness.cache.calls(),
            vec![Call::Invalidate(ACTIVE_BETS.to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn spawn__refreshes_on_each_completed_switch() {
        // given
        let Harness {
            bridge,
            cache,
            context,
            completions,
            ..
        } = harness(QueryRegistry::with_defaults());
        let _task = bridge.spawn(completions);

        // when
        context.select_guild("g2").await;
        context.complete_switch().await;
        time::sleep(Duration::from_millis(10)).await;

        // then
        let refetched = refetched(&cache.calls());
        assert_eq!(refetched.len(), 2);
        assert!(
            refetched
                .iter()
                .all(|key| key.guild == Some(GuildId::new("g2")))
        );
    }
}
