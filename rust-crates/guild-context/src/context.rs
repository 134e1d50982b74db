//! Single-writer owner of the guild switch state.
//!
//! `GuildContext` runs as its own task and is the only code that mutates
//! [`GuildSwitchState`]. Everything else sends commands through a
//! [`GuildContextHandle`] and observes the result on a watch channel.
use crate::{
    guild::{
        Guild,
        GuildId,
    },
    header_binder::HeaderBinder,
    loading::{
        LoadingKey,
        LoadingTracker,
    },
    preferences::PreferenceStore,
    sources::GuildDirectory,
    switch_state::{
        Effect,
        GuildSwitchState,
        SwitchSnapshot,
        TimerHandle,
    },
};
use std::time::Duration;
use tokio::{
    sync::{
        mpsc,
        oneshot,
        watch,
    },
    task::JoinHandle,
    time,
};
use tracing::{
    debug,
    info,
    warn,
};


#[derive(Debug)]
pub enum Command {
    SelectGuild {
        guild: GuildId,
        ack: oneshot::Sender<()>,
    },
    CompleteSwitch {
        ack: oneshot::Sender<bool>,
    },
    ConfirmSwitch {
        guild: GuildId,
        switch_seq: u64,
        ack: oneshot::Sender<bool>,
    },
    ResetSwitching {
        ack: oneshot::Sender<()>,
    },
    ApplyGuilds {
        result: Result<Vec<Guild>, String>,
        ack: oneshot::Sender<()>,
    },
    FallbackElapsed {
        timer: TimerHandle,
        guild: GuildId,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    Confirmed,
    FallbackElapsed,
}

/// Emitted once per resolved switch; the cache bridge refreshes on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchCompleted {
    pub guild: GuildId,
    pub resolution: Resolution,
}

pub struct GuildContext<P> {
    state: GuildSwitchState,
    preferences: P,
    headers: HeaderBinder,
    loading: LoadingTracker,
    fallback_timeout: Duration,
    fallback: Option<(TimerHandle, JoinHandle<()>)>,
    commands: mpsc::UnboundedReceiver<Command>,
    timer_sender: mpsc::WeakUnboundedSender<Command>,
    snapshots: watch::Sender<SwitchSnapshot>,
    completions: mpsc::UnboundedSender<SwitchCompleted>,
    resolved: Vec<SwitchCompleted>,
}

impl<P: PreferenceStore + Send + 'static> GuildContext<P> {
    /// Hydrate from `preferences` and start the context task.
    ///
    /// The restored guild is bound to outgoing headers before this returns.
    pub fn spawn(
        preferences: P,
        headers: HeaderBinder,
        loading: LoadingTracker,
        fallback_timeout: Duration,
    ) -> (GuildContextHandle, mpsc::UnboundedReceiver<SwitchCompleted>) {
        let restored = preferences.selected_guild().unwrap_or_else(|err| {
            warn!("could not restore selected guild: {err:#}");
            None
        });
        if let Some(guild) = &restored {
            info!(%guild, "restored selected guild");
        }
        headers.bind(restored.as_ref());
        let state = GuildSwitchState::hydrated(restored);

        let (command_sender, commands) = mpsc::unbounded_channel();
        let (snapshots, snapshot_receiver) = watch::channel(state.snapshot());
        let (completions, completion_receiver) = mpsc::unbounded_channel();

        let context = Self {
            state,
            preferences,
            headers,
            loading: loading.clone(),
            fallback_timeout,
            fallback: None,
            commands,
            timer_sender: command_sender.downgrade(),
            snapshots,
            completions,
            resolved: Vec::new(),
        };
        tokio::spawn(context.run());

        let handle = GuildContextHandle {
            commands: command_sender,
            snapshots: snapshot_receiver,
            loading,
        };
        (handle, completion_receiver)
    }

    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
        }
        if let Some((_, task)) = self.fallback.take() {
            task.abort();
        }
        debug!("guild context stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::SelectGuild { guild, ack } => {
                let effects = self.state.select_guild(guild.clone());
                if effects.is_empty() {
                    debug!(%guild, "guild already selected");
                } else {
                    info!(%guild, "switching guild");
                }
                self.apply(effects, Resolution::Confirmed);
                self.publish();
                let _ = ack.send(());
            }
            Command::CompleteSwitch { ack } => {
                let effects = self.state.complete_switch();
                self.confirm(effects, ack);
            }
            Command::ConfirmSwitch {
                guild,
                switch_seq,
                ack,
            } => {
                let effects = self.state.complete_switch_for(&guild, switch_seq);
                if effects.is_none() {
                    debug!(%guild, switch_seq, "ignoring confirmation for a superseded switch");
                }
                self.confirm(effects, ack);
            }
            Command::ResetSwitching { ack } => {
                if self.state.is_switching() {
                    warn!(pending = ?self.state.pending(), "resetting stuck guild switch");
                }
                let effects = self.state.reset_switching();
                self.apply(effects, Resolution::Confirmed);
                self.publish();
                let _ = ack.send(());
            }
            Command::ApplyGuilds { result, ack } => {
                match result {
                    Ok(guilds) => {
                        debug!(count = guilds.len(), "guild list refreshed");
                        let effects = self.state.replace_guilds(guilds);
                        self.apply(effects, Resolution::Confirmed);
                    }
                    Err(message) => self.state.fetch_failed(message),
                }
                self.publish();
                let _ = ack.send(());
            }
            Command::FallbackElapsed { timer, guild } => {
                let effects = self.state.fallback_elapsed(timer, &guild);
                if effects.is_empty() {
                    debug!(%guild, "ignoring stale fallback timer");
                    return;
                }
                if matches!(&self.fallback, Some((live, _)) if *live == timer) {
                    self.fallback = None;
                }
                warn!(
                    %guild,
                    "no profile confirmation within {:?}; completing switch",
                    self.fallback_timeout
                );
                self.apply(effects, Resolution::FallbackElapsed);
                self.publish();
            }
        }
    }

    fn confirm(&mut self, effects: Option<Vec<Effect>>, ack: oneshot::Sender<bool>) {
        let completed = effects.is_some();
        if let Some(effects) = effects {
            self.apply(effects, Resolution::Confirmed);
        }
        self.publish();
        let _ = ack.send(completed);
    }

    fn apply(&mut self, effects: Vec<Effect>, resolution: Resolution) {
        for effect in effects {
            match effect {
                Effect::CancelFallback(timer) => self.cancel_fallback(timer),
                Effect::ScheduleFallback { timer, guild } => {
                    self.schedule_fallback(timer, guild)
                }
                Effect::BindHeader(guild) => self.headers.bind(guild.as_ref()),
                Effect::Persist(guild) => {
                    if let Err(err) = self.preferences.set_selected_guild(guild.as_ref()) {
                        warn!(?guild, "failed to persist selected guild: {err:#}");
                    }
                }
                Effect::InvalidateGuildQueries(guild) => {
                    info!(%guild, ?resolution, "guild switch resolved");
                    self.resolved.push(SwitchCompleted { guild, resolution });
                }
            }
        }
    }

    fn cancel_fallback(&mut self, timer: TimerHandle) {
        match self.fallback.take() {
            Some((live, task)) => {
                if live != timer {
                    warn!(?live, ?timer, "cancelling a fallback timer that was not the live one");
                }
                task.abort();
            }
            None => debug!(?timer, "fallback timer already finished"),
        }
    }

    fn schedule_fallback(&mut self, timer: TimerHandle, guild: GuildId) {
        let sender = self.timer_sender.clone();
        let timeout = self.fallback_timeout;
        let task = tokio::spawn(async move {
            time::sleep(timeout).await;
            if let Some(sender) = sender.upgrade() {
                let _ = sender.send(Command::FallbackElapsed { timer, guild });
            }
        });
        if let Some((_, previous)) = self.fallback.replace((timer, task)) {
            previous.abort();
        }
    }

    fn publish(&mut self) {
        self.loading
            .set_loading(LoadingKey::GUILD_SWITCH, self.state.is_switching());
        let next = self.state.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        // a completion is only sent once the snapshot shows it settled
        for event in self.resolved.drain(..) {
            if self.completions.send(event).is_err() {
                debug!("no cache bridge listening for switch completions");
            }
        }
    }
}

/// Cloneable front door to the guild context. None of its operations fail;
/// if the context task is gone they log and return a neutral value.
#[derive(Clone)]
pub struct GuildContextHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<SwitchSnapshot>,
    loading: LoadingTracker,
}

impl GuildContextHandle {
    /// Switch to `guild`. When this returns, outgoing headers and the
    /// preference store already carry the new guild.
    pub async fn select_guild(&self, guild: impl Into<GuildId>) {
        let guild = guild.into();
        self.request(|ack| Command::SelectGuild { guild, ack }).await
    }

    /// Confirm the pending switch; `false` when there is none or it was
    /// superseded by a newer select.
    pub async fn complete_switch(&self) -> bool {
        self.request(|ack| Command::CompleteSwitch { ack }).await
    }

    /// Confirm the switch to `guild` numbered `switch_seq` (see
    /// [`SwitchSnapshot::switch_seq`]). `false` once any newer select has
    /// happened, even one that returned to `guild`.
    pub async fn confirm_switch(&self, guild: GuildId, switch_seq: u64) -> bool {
        self.request(|ack| Command::ConfirmSwitch {
            guild,
            switch_seq,
            ack,
        })
        .await
    }

    /// Manual escape hatch for a switch that never resolved.
    pub async fn reset_switching(&self) {
        self.request(|ack| Command::ResetSwitching { ack }).await
    }

    /// Refresh the guild list for `principal`. Failures are recorded on the
    /// snapshot and under [`LoadingKey::GUILD_LIST`].
    pub async fn fetch_guilds<D: GuildDirectory>(&self, directory: &D, principal: &str) {
        let result = self
            .loading
            .with_loading(LoadingKey::GUILD_LIST, || directory.list_guilds(principal))
            .await
            .map_err(|err| format!("{err:#}"));
        self.request(|ack| Command::ApplyGuilds { result, ack })
            .await
    }

    pub fn snapshot(&self) -> SwitchSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn selected_guild(&self) -> Option<Guild> {
        self.snapshots.borrow().selected_guild().cloned()
    }

    pub fn is_switching(&self) -> bool {
        self.snapshots.borrow().is_switching()
    }

    pub fn subscribe(&self) -> watch::Receiver<SwitchSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until no switch is in flight.
    pub async fn settled(&self) -> SwitchSnapshot {
        let mut snapshots = self.subscribe();
        match snapshots.wait_for(|snapshot| !snapshot.is_switching()).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        }
    }

    async fn request<T: Default>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> T {
        let (ack, reply) = oneshot::channel();
        if self.commands.send(command(ack)).is_err() {
            warn!("guild context is no longer running");
            return T::default();
        }
        reply.await.unwrap_or_default()
    }
}
