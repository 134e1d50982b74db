use crate::{
    guild::GuildId,
    preferences::PreferenceStore,
};
use std::sync::{
    Arc,
    Mutex,
    PoisonError,
};

#[derive(Clone, Default)]
pub struct InMemoryPreferenceStore {
    selected: Arc<Mutex<Option<GuildId>>>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_selected(guild: impl Into<GuildId>) -> Self {
        Self {
            selected: Arc::new(Mutex::new(Some(guild.into()))),
        }
    }

    pub fn selected(&self) -> Arc<Mutex<Option<GuildId>>> {
        self.selected.clone()
    }
}

impl PreferenceStore for InMemoryPreferenceStore {
    fn selected_guild(&self) -> crate::Result<Option<GuildId>> {
        let guard = self.selected.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.clone())
    }

    fn set_selected_guild(&mut self, guild: Option<&GuildId>) -> crate::Result<()> {
        let mut guard = self.selected.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = guild.cloned();
        Ok(())
    }
}
