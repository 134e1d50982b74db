use crate::guild::GuildId;

pub mod in_memory;
pub mod sled_storage;

/// Key the last selected guild is stored under.
pub const SELECTED_GUILD_KEY: &str = "selectedTenantId";

/// Durable key/value storage that survives a restart of the dashboard. It only
/// ever holds the last selected guild.
pub trait PreferenceStore {
    /// retrieve the guild selected in a previous session, if any
    fn selected_guild(&self) -> crate::Result<Option<GuildId>>;

    /// write or clear the selected guild
    fn set_selected_guild(&mut self, guild: Option<&GuildId>) -> crate::Result<()>;
}
