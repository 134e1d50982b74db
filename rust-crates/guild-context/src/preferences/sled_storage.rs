// Sled-backed preference persistence.
use crate::{
    guild::GuildId,
    preferences::{
        PreferenceStore,
        SELECTED_GUILD_KEY,
    },
};
use anyhow::Context;
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use sled::{
    Config,
    Db,
    Tree,
};
use std::path::Path;

#[derive(Clone)]
pub struct SledPreferenceStore {
    tree: Tree,
}

#[derive(Debug, Serialize, Deserialize)]
struct SelectionRecord {
    guild_id: GuildId,
    saved_at: DateTime<Utc>,
}

impl SledPreferenceStore {
    pub fn new(db: &Db) -> crate::Result<Self> {
        let tree = db
            .open_tree("preferences")
            .context("open preferences tree")?;
        Ok(Self { tree })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let config = Config::default().path(path);
        let db = config.open().context("open sled database")?;
        Self::new(&db)
    }
}

impl PreferenceStore for SledPreferenceStore {
    fn selected_guild(&self) -> crate::Result<Option<GuildId>> {
        let Some(bytes) = self
            .tree
            .get(SELECTED_GUILD_KEY)
            .context("read selected guild")?
        else {
            return Ok(None);
        };
        let record: SelectionRecord =
            serde_json::from_slice(&bytes).context("decode selected guild record")?;
        tracing::debug!(
            "restored guild {} selected at {}",
            record.guild_id,
            record.saved_at
        );
        Ok(Some(record.guild_id))
    }

    fn set_selected_guild(&mut self, guild: Option<&GuildId>) -> crate::Result<()> {
        match guild {
            Some(guild_id) => {
                let record = SelectionRecord {
                    guild_id: guild_id.clone(),
                    saved_at: Utc::now(),
                };
                let bytes =
                    serde_json::to_vec(&record).context("encode selected guild record")?;
                self.tree
                    .insert(SELECTED_GUILD_KEY, bytes)
                    .context("write selected guild")?;
            }
            None => {
                self.tree
                    .remove(SELECTED_GUILD_KEY)
                    .context("remove selected guild")?;
            }
        }
        self.tree.flush().context("flush preferences")?;
        Ok(())
    }
}
