//! Confirms a pending switch once the backend answers for the new guild.
use crate::{
    context::GuildContextHandle,
    guild::GuildId,
    loading::{
        LoadingKey,
        LoadingTracker,
    },
    sources::ProfileSource,
};
use std::time::Duration;
use tokio::{
    task::JoinHandle,
    time,
};
use tracing::debug;

/// Watches the selected guild and fetches the acting user's profile for it.
/// A profile for the guild of the switch that triggered the fetch completes
/// that switch after a grace period. Fetches are never cancelled; answers and
/// confirmations for a switch that has since been superseded are dropped.
#[derive(Clone)]
pub struct ProfileSyncListener<S> {
    source: S,
    context: GuildContextHandle,
    loading: LoadingTracker,
    grace_period: Duration,
}

impl<S: ProfileSource + Clone + Send + Sync + 'static> ProfileSyncListener<S> {
    pub fn new(
        source: S,
        context: GuildContextHandle,
        loading: LoadingTracker,
        grace_period: Duration,
    ) -> Self {
        Self {
            source,
            context,
            loading,
            grace_period,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut snapshots = self.context.subscribe();
        let mut last_seen = None;
        loop {
            let current = {
                let snapshot = snapshots.borrow_and_update();
                (snapshot.selected.clone(), snapshot.switch_seq)
            };
            if last_seen.as_ref() != Some(&current) {
                if let Some(guild) = current.0.clone() {
                    tokio::spawn(self.clone().sync(guild, current.1));
                }
                last_seen = Some(current);
            }
            if snapshots.changed().await.is_err() {
                break;
            }
        }
        debug!("profile sync listener stopped");
    }

    async fn sync(self, guild: GuildId, switch_seq: u64) {
        let fetched = self
            .loading
            .with_loading(LoadingKey::PROFILE_SYNC, || self.source.profile(&guild))
            .await;
        let Ok(profile) = fetched else {
            // recorded under the loading key; the fallback timer resolves it
            return;
        };

        let snapshot = self.context.snapshot();
        if profile.guild_id != guild
            || snapshot.pending.as_ref() != Some(&guild)
            || snapshot.switch_seq != switch_seq
        {
            debug!(
                requested = %guild,
                answered = %profile.guild_id,
                pending = ?snapshot.pending,
                switch_seq,
                current_seq = snapshot.switch_seq,
                "discarding profile for a switch that is not pending"
            );
            return;
        }

        time::sleep(self.grace_period).await;
        if !self.context.confirm_switch(guild.clone(), switch_seq).await {
            debug!(%guild, switch_seq, "switch already resolved or superseded");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        context::{
            GuildContext,
            Resolution,
            SwitchCompleted,
        },
        guild::Profile,
        header_binder::HeaderBinder,
        preferences::in_memory::InMemoryPreferenceStore,
    };
    use anyhow::anyhow;
    use std::{
        collections::HashMap,
        sync::{
            Arc,
            Mutex,
        },
    };
    use tokio::sync::mpsc;

    const FALLBACK: Duration = Duration::from_millis(5_000);
    const GRACE: Duration = Duration::from_millis(1_000);

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn profile_in(guild: &str) -> Profile {
        Profile {
            user_id: "user-1".to_string(),
            username: "croupier".to_string(),
            balance: 250,
            guild_id: GuildId::new(guild),
        }
    }

    #[derive(Clone, Default)]
    struct ScriptedProfiles {
        responses: Arc<Mutex<HashMap<GuildId, (Duration, Result<Profile, String>)>>>,
    }

    impl ScriptedProfiles {
        fn answer(&self, guild: &str, after: Duration, response: Result<Profile, String>) {
            self.responses
                .lock()
                .unwrap()
                .insert(GuildId::new(guild), (after, response));
        }
    }

    impl ProfileSource for ScriptedProfiles {
        async fn profile(&self, guild: &GuildId) -> crate::Result<Profile> {
            let scripted = self.responses.lock().unwrap().get(guild).cloned();
            let (after, response) =
                scripted.unwrap_or_else(|| (Duration::ZERO, Err(format!("no profile for {guild}"))));
            time::sleep(after).await;
            response.map_err(|message| anyhow!(message))
        }
    }

    struct Harness {
        context: GuildContextHandle,
        completions: mpsc::UnboundedReceiver<SwitchCompleted>,
        loading: LoadingTracker,
    }

    fn start(profiles: ScriptedProfiles) -> Harness {
        let loading = LoadingTracker::new();
        let (context, completions) = GuildContext::spawn(
            InMemoryPreferenceStore::new(),
            HeaderBinder::new(),
            loading.clone(),
            FALLBACK,
        );
        ProfileSyncListener::new(profiles, context.clone(), loading.clone(), GRACE).spawn();
        Harness {
            context,
            completions,
            loading,
        }
    }

    fn drain(completions: &mut mpsc::UnboundedReceiver<SwitchCompleted>) -> Vec<SwitchCompleted> {
        let mut events = Vec::new();
        while let Ok(event) = completions.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn sync__matching_profile_completes_switch_after_grace_period() {
        // given
        let profiles = ScriptedProfiles::default();
        profiles.answer("g2", ms(200), Ok(profile_in("g2")));
        let mut harness = start(profiles);

        // when
        harness.context.select_guild("g2").await;

        // then
        time::sleep(ms(1_199)).await;
        assert!(harness.context.is_switching());
        time::sleep(ms(2)).await;
        assert!(!harness.context.is_switching());
        let expected = vec![SwitchCompleted {
            guild: GuildId::new("g2"),
            resolution: Resolution::Confirmed,
        }];
        assert_eq!(drain(&mut harness.completions), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn sync__late_answer_for_previous_guild_is_discarded() {
        // given
        let profiles = ScriptedProfiles::default();
        profiles.answer("a", ms(3_000), Ok(profile_in("a")));
        profiles.answer("b", ms(0), Err("profile service down".to_string()));
        let mut harness = start(profiles);
        harness.context.select_guild("a").await;
        time::sleep(ms(100)).await;

        // when
        harness.context.select_guild("b").await;

        // then
        time::sleep(ms(4_000)).await;
        assert_eq!(harness.context.snapshot().pending, Some(GuildId::new("b")));
        assert!(drain(&mut harness.completions).is_empty());

        time::sleep(ms(1_001)).await;
        let expected = vec![SwitchCompleted {
            guild: GuildId::new("b"),
            resolution: Resolution::FallbackElapsed,
        }];
        assert_eq!(drain(&mut harness.completions), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn sync__select_during_grace_period_is_not_confirmed_by_previous_guild() {
        // given
        let profiles = ScriptedProfiles::default();
        profiles.answer("a", ms(100), Ok(profile_in("a")));
        profiles.answer("b", ms(10_000), Err("never answers".to_string()));
        let mut harness = start(profiles);
        harness.context.select_guild("a").await;
        time::sleep(ms(500)).await;

        // when
        harness.context.select_guild("b").await;

        // then
        time::sleep(ms(700)).await;
        assert_eq!(harness.context.snapshot().pending, Some(GuildId::new("b")));
        assert!(drain(&mut harness.completions).is_empty());

        time::sleep(ms(4_301)).await;
        let expected = vec![SwitchCompleted {
            guild: GuildId::new("b"),
            resolution: Resolution::FallbackElapsed,
        }];
        assert_eq!(drain(&mut harness.completions), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn sync__returning_to_a_guild_within_grace_period_waits_for_its_new_profile() {
        // given
        let profiles = ScriptedProfiles::default();
        profiles.answer("a", ms(100), Ok(profile_in("a")));
        profiles.answer("b", ms(10_000), Err("never answers".to_string()));
        let mut harness = start(profiles);
        harness.context.select_guild("a").await;
        time::sleep(ms(300)).await;
        harness.context.select_guild("b").await;
        time::sleep(ms(100)).await;

        // when
        harness.context.select_guild("a").await;

        // then
        time::sleep(ms(1_099)).await;
        assert!(harness.context.is_switching());
        assert!(drain(&mut harness.completions).is_empty());

        time::sleep(ms(2)).await;
        assert!(!harness.context.is_switching());
        let expected = vec![SwitchCompleted {
            guild: GuildId::new("a"),
            resolution: Resolution::Confirmed,
        }];
        assert_eq!(drain(&mut harness.completions), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn sync__failure_is_recorded_and_leaves_switch_to_the_fallback() {
        // given
        let profiles = ScriptedProfiles::default();
        profiles.answer("g2", ms(50), Err("502 Bad Gateway".to_string()));
        let harness = start(profiles);

        // when
        harness.context.select_guild("g2").await;
        time::sleep(ms(100)).await;

        // then
        let error = harness.loading.error(&LoadingKey::PROFILE_SYNC).unwrap();
        assert_eq!(error.message, "502 Bad Gateway");
        assert!(harness.context.is_switching());
        let snapshot = harness.context.settled().await;
        assert_eq!(snapshot.selected, Some(GuildId::new("g2")));
    }

    #[tokio::test(start_paused = true)]
    async fn run__reselecting_an_earlier_guild_fetches_again() {
        // given
        let profiles = ScriptedProfiles::default();
        profiles.answer("a", ms(100), Ok(profile_in("a")));
        profiles.answer("b", ms(5_000), Err("slow".to_string()));
        let mut harness = start(profiles);
        harness.context.select_guild("a").await;
        time::sleep(ms(1_200)).await;
        harness.context.select_guild("b").await;

        // when
        harness.context.select_guild("a").await;

        // then
        time::sleep(ms(1_101)).await;
        assert!(!harness.context.is_switching());
        let resolved: Vec<_> = drain(&mut harness.completions)
            .into_iter()
            .map(|event| (event.guild, event.resolution))
            .collect();
        assert_eq!(
            resolved,
            vec![
                (GuildId::new("a"), Resolution::Confirmed),
                (GuildId::new("a"), Resolution::Confirmed),
            ]
        );
    }
}
