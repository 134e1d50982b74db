pub mod api_client;
pub mod config;
pub mod context;
pub mod coordinated;
pub mod guild;
pub mod header_binder;
pub mod heartbeat;
pub mod invalidation;
pub mod loading;
pub mod preferences;
pub mod profile_sync;
pub mod query_cache;
pub mod session;
pub mod sources;
pub mod stabilize;
pub mod switch_state;

#[cfg(feature = "test-helpers")]
pub mod test_helpers;

pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
