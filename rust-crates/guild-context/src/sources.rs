use crate::guild::{
    AuthenticatedUser,
    Guild,
    GuildId,
    Profile,
};

pub trait GuildDirectory {
    /// guilds the given principal can see, in display order
    fn list_guilds(
        &self,
        principal: &str,
    ) -> impl Future<Output = crate::Result<Vec<Guild>>> + Send;
}

pub trait ProfileSource {
    /// profile of the acting user inside `guild`
    fn profile(
        &self,
        guild: &GuildId,
    ) -> impl Future<Output = crate::Result<Profile>> + Send;
}

pub trait SessionSource {
    /// resolve the authenticated principal for this session
    fn current_user(&self) -> impl Future<Output = crate::Result<AuthenticatedUser>> + Send;
}

pub trait HealthCheck {
    fn heartbeat(&self) -> impl Future<Output = crate::Result<()>> + Send;
}
