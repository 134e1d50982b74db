use crate::{
    loading::{
        LoadingKey,
        LoadingTracker,
    },
    sources::HealthCheck,
};
use std::time::Duration;
use tokio::{
    task::JoinHandle,
    time::{
        self,
        MissedTickBehavior,
    },
};

/// Periodic backend health check. Each beat runs under
/// [`LoadingKey::HEARTBEAT`], so a failing backend shows up as an error on
/// that key rather than stopping the loop.
pub struct Heartbeat<S> {
    source: S,
    loading: LoadingTracker,
    interval: Duration,
}

impl<S: HealthCheck + Send + Sync + 'static> Heartbeat<S> {
    pub fn new(source: S, loading: LoadingTracker, interval: Duration) -> Self {
        Self {
            source,
            loading,
            interval,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let beat = self
                .loading
                .with_loading(LoadingKey::HEARTBEAT, || self.source.heartbeat())
                .await;
            if beat.is_ok() {
                tracing::trace!("heartbeat ok");
            }
        }
    }
}
