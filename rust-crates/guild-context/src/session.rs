//! Wires the context, loading and cache pieces into one running dashboard
//! session.
use crate::{
    config::CoordinatorConfig,
    context::{
        GuildContext,
        GuildContextHandle,
    },
    coordinated::CoordinatedLoading,
    guild::AuthenticatedUser,
    header_binder::HeaderBinder,
    heartbeat::Heartbeat,
    invalidation::CacheInvalidationBridge,
    loading::{
        LoadingKey,
        LoadingTracker,
    },
    preferences::PreferenceStore,
    profile_sync::ProfileSyncListener,
    query_cache::{
        QueryCache,
        QueryRegistry,
    },
    sources::{
        GuildDirectory,
        HealthCheck,
        ProfileSource,
        SessionSource,
    },
};
use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::info;

pub struct DashboardSession<C> {
    user: AuthenticatedUser,
    context: GuildContextHandle,
    loading: LoadingTracker,
    shell: CoordinatedLoading,
    invalidation: CacheInvalidationBridge<C>,
    tasks: Vec<JoinHandle<()>>,
}

impl<C: QueryCache + Clone + Send + Sync + 'static> DashboardSession<C> {
    /// Authenticate, restore the last guild, start the background listeners
    /// and load the guild list. Only a failed auth check fails the start.
    pub async fn start<A, P>(
        config: &CoordinatorConfig,
        api: A,
        headers: HeaderBinder,
        preferences: P,
        cache: C,
        registry: QueryRegistry,
    ) -> crate::Result<Self>
    where
        A: GuildDirectory
            + ProfileSource
            + SessionSource
            + HealthCheck
            + Clone
            + Send
            + Sync
            + 'static,
        P: PreferenceStore + Send + 'static,
    {
        config.validate()?;
        let loading = LoadingTracker::new();
        let shell = CoordinatedLoading::spawn(
            loading.clone(),
            LoadingKey::shell_keys(),
            config.stabilization_window,
        );

        let user = loading
            .with_loading(LoadingKey::AUTH, || api.current_user())
            .await
            .context("dashboard session is not authenticated")?;
        info!(user = %user.username, "authenticated");

        let (context, completions) =
            GuildContext::spawn(preferences, headers, loading.clone(), config.fallback_timeout);
        let invalidation = CacheInvalidationBridge::new(
            registry,
            cache,
            loading.clone(),
            context.clone(),
            user.id.clone(),
        );
        let tasks = vec![
            invalidation.clone().spawn(completions),
            ProfileSyncListener::new(
                api.clone(),
                context.clone(),
                loading.clone(),
                config.grace_period,
            )
            .spawn(),
            Heartbeat::new(api.clone(), loading.clone(), config.heartbeat_interval).spawn(),
        ];

        context.fetch_guilds(&api, &user.id).await;

        Ok(Self {
            user,
            context,
            loading,
            shell,
            invalidation,
            tasks,
        })
    }

    pub fn user(&self) -> &AuthenticatedUser {
        &self.user
    }

    pub fn context(&self) -> &GuildContextHandle {
        &self.context
    }

    pub fn loading(&self) -> &LoadingTracker {
        &self.loading
    }

    pub fn shell(&self) -> &CoordinatedLoading {
        &self.shell
    }

    pub fn invalidation(&self) -> &CacheInvalidationBridge<C> {
        &self.invalidation
    }

    /// Refresh the guild list for the logged-in user.
    pub async fn refresh_guilds<D: GuildDirectory>(&self, directory: &D) {
        self.context.fetch_guilds(directory, &self.user.id).await
    }
}

impl<C> Drop for DashboardSession<C> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
