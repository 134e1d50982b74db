use crate::guild::GuildId;
use reqwest::header::{
    HeaderMap,
    HeaderValue,
};
use std::sync::{
    Arc,
    PoisonError,
    RwLock,
};

/// Header every dashboard request carries so the backend knows which guild the
/// call is scoped to.
pub const GUILD_HEADER: &str = "x-guild-id";

/// Shared slot holding the guild outgoing requests are bound to.
///
/// The context actor writes it while handling a select, before the caller is
/// acknowledged, so anything built afterwards carries the new guild. Requests
/// capture the headers when they are built; a request already in flight keeps
/// the guild it was dispatched with.
#[derive(Clone, Debug, Default)]
pub struct HeaderBinder {
    current: Arc<RwLock<Option<GuildId>>>,
}

impl HeaderBinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, guild: Option<&GuildId>) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if guard.as_ref() != guild {
            tracing::debug!(?guild, "rebinding {GUILD_HEADER}");
        }
        *guard = guild.cloned();
    }

    pub fn current(&self) -> Option<GuildId> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Headers to attach to a request being built right now.
    pub fn default_headers(&self) -> HeaderMap {
        Self::scoped_headers(self.current().as_ref())
    }

    /// Headers for a request that must reach `guild` whatever is bound.
    pub fn scoped_headers(guild: Option<&GuildId>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let Some(guild) = guild else {
            return headers;
        };
        match HeaderValue::from_str(guild.as_str()) {
            Ok(value) => {
                headers.insert(GUILD_HEADER, value);
            }
            Err(err) => {
                tracing::warn!(%guild, ?err, "guild id is not a valid header value");
            }
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn default_headers__carries_the_bound_guild() {
        // given
        let binder = HeaderBinder::new();

        // when
        binder.bind(Some(&GuildId::new("g2")));

        // then
        let headers = binder.default_headers();
        assert_eq!(headers.get(GUILD_HEADER).unwrap(), "g2");
    }

    #[test]
    fn default_headers__captured_before_rebind_keep_the_old_guild() {
        // given
        let binder = HeaderBinder::new();
        binder.bind(Some(&GuildId::new("g1")));
        let in_flight = binder.default_headers();

        // when
        binder.bind(Some(&GuildId::new("g2")));

        // then
        assert_eq!(in_flight.get(GUILD_HEADER).unwrap(), "g1");
        assert_eq!(binder.default_headers().get(GUILD_HEADER).unwrap(), "g2");
    }

    #[test]
    fn default_headers__is_empty_when_unbound() {
        // given
        let binder = HeaderBinder::new();
        binder.bind(Some(&GuildId::new("g1")));

        // when
        binder.bind(None);

        // then
        assert!(binder.default_headers().is_empty());
    }

    #[test]
    fn scoped_headers__ignore_the_bound_guild() {
        // given
        let binder = HeaderBinder::new();
        binder.bind(Some(&GuildId::new("g2")));

        // when
        let headers = HeaderBinder::scoped_headers(Some(&GuildId::new("g1")));

        // then
        assert_eq!(headers.get(GUILD_HEADER).unwrap(), "g1");
        assert!(HeaderBinder::scoped_headers(None).is_empty());
    }
}
