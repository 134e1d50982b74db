//! Pure state machine behind guild switching.
//!
//! Every operation mutates the state and returns the side effects the owner
//! has to carry out (timers, persistence, header binding, cache
//! invalidation). Nothing here sleeps, spawns or performs I/O, which keeps the
//! ordering rules testable without a runtime.
//!
//! Overlapping switches are resolved with equality guards rather than locks:
//! a completion or a fallback timer only takes effect while the switch it was
//! issued for is still the pending one.
use crate::guild::{
    Guild,
    GuildId,
};

/// Identifies one scheduled fallback timer. A fired timer whose handle no
/// longer matches the live one is stale and ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    CancelFallback(TimerHandle),
    ScheduleFallback { timer: TimerHandle, guild: GuildId },
    BindHeader(Option<GuildId>),
    Persist(Option<GuildId>),
    /// The switch to this guild resolved, by confirmation or by fallback.
    InvalidateGuildQueries(GuildId),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SwitchSnapshot {
    pub guilds: Vec<Guild>,
    pub selected: Option<GuildId>,
    pub pending: Option<GuildId>,
    /// Bumped on every accepted select, so observers can tell apart two
    /// switches that land on the same guild.
    pub switch_seq: u64,
    pub error: Option<String>,
}

impl SwitchSnapshot {
    pub fn is_switching(&self) -> bool {
        self.pending.is_some()
    }

    pub fn selected_guild(&self) -> Option<&Guild> {
        let selected = self.selected.as_ref()?;
        self.guilds.iter().find(|guild| &guild.id == selected)
    }
}

#[derive(Debug, Default)]
pub struct GuildSwitchState {
    guilds: Vec<Guild>,
    selected: Option<GuildId>,
    pending: Option<GuildId>,
    fallback_timer: Option<TimerHandle>,
    next_timer: u64,
    switch_seq: u64,
    error: Option<String>,
}

impl GuildSwitchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State restored from the preference store at start-up.
    pub fn hydrated(selected: Option<GuildId>) -> Self {
        Self {
            selected,
            ..Self::default()
        }
    }

    pub fn guilds(&self) -> &[Guild] {
        &self.guilds
    }

    pub fn selected(&self) -> Option<&GuildId> {
        self.selected.as_ref()
    }

    pub fn pending(&self) -> Option<&GuildId> {
        self.pending.as_ref()
    }

    pub fn is_switching(&self) -> bool {
        self.pending.is_some()
    }

    pub fn switch_seq(&self) -> u64 {
        self.switch_seq
    }

    pub fn fallback_timer(&self) -> Option<TimerHandle> {
        self.fallback_timer
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn selected_guild(&self) -> Option<&Guild> {
        let selected = self.selected.as_ref()?;
        self.guilds.iter().find(|guild| &guild.id == selected)
    }

    pub fn snapshot(&self) -> SwitchSnapshot {
        SwitchSnapshot {
            guilds: self.guilds.clone(),
            selected: self.selected.clone(),
            pending: self.pending.clone(),
            switch_seq: self.switch_seq,
            error: self.error.clone(),
        }
    }

    /// Begin a switch to `guild`. Selecting the current guild does nothing.
    pub fn select_guild(&mut self, guild: GuildId) -> Vec<Effect> {
        if self.selected.as_ref() == Some(&guild) {
            return Vec::new();
        }
        let mut effects = Vec::with_capacity(4);
        effects.extend(self.cancel_fallback());
        self.pending = Some(guild.clone());
        self.selected = Some(guild.clone());
        self.switch_seq += 1;
        effects.push(Effect::BindHeader(Some(guild.clone())));
        effects.push(Effect::Persist(Some(guild.clone())));
        let timer = self.issue_timer();
        self.fallback_timer = Some(timer);
        effects.push(Effect::ScheduleFallback { timer, guild });
        effects
    }

    /// Confirm the pending switch. Returns `None`, and changes nothing, unless
    /// a switch is in flight and it targets the selected guild.
    pub fn complete_switch(&mut self) -> Option<Vec<Effect>> {
        let guild = match (&self.pending, &self.selected) {
            (Some(pending), Some(selected)) if pending == selected => pending.clone(),
            _ => return None,
        };
        let mut effects = Vec::with_capacity(2);
        effects.extend(self.cancel_fallback());
        self.pending = None;
        effects.push(Effect::InvalidateGuildQueries(guild));
        Some(effects)
    }

    /// Confirm the switch to `guild` that began at `switch_seq`. Returns
    /// `None` once any later select has happened, including one that came
    /// back to the same guild.
    pub fn complete_switch_for(
        &mut self,
        guild: &GuildId,
        switch_seq: u64,
    ) -> Option<Vec<Effect>> {
        if self.switch_seq != switch_seq || self.pending.as_ref() != Some(guild) {
            return None;
        }
        self.complete_switch()
    }

    /// Force-complete a switch nobody confirmed. Ignored when `timer` is not
    /// the live timer or the switch it was armed for has been superseded.
    pub fn fallback_elapsed(&mut self, timer: TimerHandle, guild: &GuildId) -> Vec<Effect> {
        if self.fallback_timer != Some(timer) || self.pending.as_ref() != Some(guild) {
            return Vec::new();
        }
        self.fallback_timer = None;
        self.pending = None;
        vec![Effect::InvalidateGuildQueries(guild.clone())]
    }

    /// Hard reset for a switch observed to be stuck. Does not invalidate.
    pub fn reset_switching(&mut self) -> Vec<Effect> {
        self.pending = None;
        self.cancel_fallback().into_iter().collect()
    }

    /// Replace the guild list after a successful fetch.
    ///
    /// A selection the principal can no longer see is cleared. Only when no
    /// guild was selected beforehand is the first listed guild selected.
    pub fn replace_guilds(&mut self, guilds: Vec<Guild>) -> Vec<Effect> {
        self.guilds = guilds;
        self.error = None;
        match self.selected.clone() {
            Some(selected) if !self.guilds.iter().any(|guild| guild.id == selected) => {
                let mut effects = Vec::with_capacity(3);
                effects.extend(self.cancel_fallback());
                self.pending = None;
                self.selected = None;
                effects.push(Effect::BindHeader(None));
                effects.push(Effect::Persist(None));
                effects
            }
            Some(_) => Vec::new(),
            None => match self.guilds.first() {
                Some(first) => {
                    let first = first.id.clone();
                    self.select_guild(first)
                }
                None => Vec::new(),
            },
        }
    }

    /// The guild list could not be fetched; the previous list stays in place.
    pub fn fetch_failed(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    fn cancel_fallback(&mut self) -> Option<Effect> {
        self.fallback_timer.take().map(Effect::CancelFallback)
    }

    fn issue_timer(&mut self) -> TimerHandle {
        self.next_timer += 1;
        TimerHandle(self.next_timer)
    }
}
