//! Live page-shell state derived from a set of loading keys.
use crate::{
    loading::{
        LoadingKey,
        LoadingTracker,
    },
    stabilize::{
        AppShellGate,
        ShellState,
    },
};
use std::time::Duration;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{
        self,
        Instant,
    },
};

/// Drives an [`AppShellGate`] from tracker changes and its own timer, and
/// publishes the resulting [`ShellState`]. The task stops when this is dropped.
pub struct CoordinatedLoading {
    states: watch::Receiver<ShellState>,
    task: JoinHandle<()>,
}

impl CoordinatedLoading {
    pub fn spawn(tracker: LoadingTracker, keys: Vec<LoadingKey>, window: Duration) -> Self {
        let (sender, states) = watch::channel(ShellState {
            show_loading_screen: true,
            ..ShellState::default()
        });
        let task = tokio::spawn(drive(tracker, keys, window, sender));
        Self { states, task }
    }

    pub fn state(&self) -> ShellState {
        *self.states.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ShellState> {
        self.states.clone()
    }

    /// Resolves once the app has been shown for the first time.
    pub async fn wait_until_shown(&self) -> ShellState {
        let mut states = self.subscribe();
        match states.wait_for(|state| state.has_shown_app).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }
}

impl Drop for CoordinatedLoading {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drive(
    tracker: LoadingTracker,
    keys: Vec<LoadingKey>,
    window: Duration,
    sender: watch::Sender<ShellState>,
) {
    let mut changes = tracker.subscribe();
    let mut gate = AppShellGate::new(window);
    gate.observe(tracker.is_any_loading_of(&keys), Instant::now());
    publish(&sender, gate.poll(Instant::now()));

    loop {
        let deadline = gate.deadline();
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                changes.borrow_and_update();
                gate.observe(tracker.is_any_loading_of(&keys), Instant::now());
            }
            _ = sleep_until(deadline) => {}
        }
        publish(&sender, gate.poll(Instant::now()));
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn publish(sender: &watch::Sender<ShellState>, next: ShellState) {
    sender.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        if next.has_shown_app && !current.has_shown_app {
            tracing::info!("dependencies settled; showing app");
        }
        *current = next;
        true
    });
}
