use anyhow::{
    Context,
    anyhow,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fs,
    path::Path,
    time::Duration,
};

pub const DEFAULT_FALLBACK_TIMEOUT: Duration = Duration::from_millis(5_000);
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(1_000);
pub const DEFAULT_STABILIZATION_WINDOW: Duration = Duration::from_millis(600);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Timing knobs of the switch/loading pipeline.
///
/// `fallback_timeout` has to outlast `grace_period` plus the slowest profile
/// round trip you expect, otherwise switches routinely finish through the
/// fallback path instead of a confirmed profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    #[serde(rename = "fallback_timeout_ms", with = "millis")]
    pub fallback_timeout: Duration,
    #[serde(rename = "grace_period_ms", with = "millis")]
    pub grace_period: Duration,
    #[serde(rename = "stabilization_window_ms", with = "millis")]
    pub stabilization_window: Duration,
    #[serde(rename = "heartbeat_interval_ms", with = "millis")]
    pub heartbeat_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            fallback_timeout: DEFAULT_FALLBACK_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
            stabilization_window: DEFAULT_STABILIZATION_WINDOW,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

impl CoordinatorConfig {
    /// Read a JSON config file; missing fields fall back to the defaults.
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)
            .with_context(|| format!("reading coordinator config {}", path.display()))?;
        let config: Self = serde_json::from_slice(&data)
            .with_context(|| format!("parsing coordinator config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.fallback_timeout <= self.grace_period {
            return Err(anyhow!(
                "fallback timeout ({:?}) must exceed the grace period ({:?})",
                self.fallback_timeout,
                self.grace_period
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(anyhow!("heartbeat interval must be non-zero"));
        }
        Ok(())
    }
}

mod millis {
    use serde::{
        Deserialize,
        Deserializer,
        Serializer,
    };
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
