//! Debounce-to-ready plus the first-paint latch.
//!
//! Going from loading to ready is delayed until the combined signal has been
//! idle for a full window; going back to loading is immediate. The page shell
//! latches the first ready it ever sees and never shows the full-page loader
//! again afterwards.
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sample {
    pub at: Instant,
    pub loading: bool,
}

impl Sample {
    pub fn new(at: Instant, loading: bool) -> Self {
        Self { at, loading }
    }
}

/// Whether a time-ordered series of combined loading samples counts as ready
/// at `now`: the trailing run of idle samples must span at least `window`.
/// An empty series is never ready.
pub fn stabilize(samples: &[Sample], window: Duration, now: Instant) -> bool {
    let idle_since = samples
        .iter()
        .rev()
        .take_while(|sample| !sample.loading)
        .last()
        .map(|sample| sample.at);
    match idle_since {
        Some(since) => now.saturating_duration_since(since) >= window,
        None => false,
    }
}

/// Incremental form of [`stabilize`] for a live signal.
#[derive(Clone, Debug)]
pub struct Stabilizer {
    window: Duration,
    idle_since: Option<Instant>,
    ready: bool,
}

impl Stabilizer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            idle_since: None,
            ready: false,
        }
    }

    pub fn observe(&mut self, loading: bool, at: Instant) {
        if loading {
            self.idle_since = None;
            self.ready = false;
        } else if self.idle_since.is_none() {
            self.idle_since = Some(at);
        }
    }

    pub fn poll(&mut self, now: Instant) -> bool {
        if let Some(since) = self.idle_since
            && now.saturating_duration_since(since) >= self.window
        {
            self.ready = true;
        }
        self.ready
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// When `poll` would next flip to ready, if a flip is pending.
    pub fn deadline(&self) -> Option<Instant> {
        if self.ready {
            return None;
        }
        self.idle_since.map(|since| since + self.window)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShellState {
    /// Debounced "every dependency settled" signal.
    pub ready: bool,
    pub has_shown_app: bool,
    pub show_loading_screen: bool,
}

/// Page-shell gate: full-page loader until the first stabilized ready, then
/// never again for the session.
#[derive(Clone, Debug)]
pub struct AppShellGate {
    stabilizer: Stabilizer,
    has_shown_app: bool,
}

impl AppShellGate {
    pub fn new(window: Duration) -> Self {
        Self {
            stabilizer: Stabilizer::new(window),
            has_shown_app: false,
        }
    }

    pub fn observe(&mut self, loading: bool, at: Instant) {
        self.stabilizer.observe(loading, at);
    }

    pub fn poll(&mut self, now: Instant) -> ShellState {
        let ready = self.stabilizer.poll(now);
        if ready {
            self.has_shown_app = true;
        }
        ShellState {
            ready,
            has_shown_app: self.has_shown_app,
            show_loading_screen: !self.has_shown_app,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.stabilizer.deadline()
    }

    pub fn has_shown_app(&self) -> bool {
        self.has_shown_app
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use proptest::prelude::*;

    const WINDOW: Duration = Duration::from_millis(600);

    fn ms(base: Instant, offset: u64) -> Instant {
        base + Duration::from_millis(offset)
    }

    #[test]
    fn stabilize__requires_idle_for_the_whole_window() {
        // given
        let base = Instant::now();
        let samples = [
            Sample::new(ms(base, 0), true),
            Sample::new(ms(base, 100), false),
            Sample::new(ms(base, 150), false),
        ];

        // then
        assert!(!stabilize(&samples, WINDOW, ms(base, 699)));
        assert!(stabilize(&samples, WINDOW, ms(base, 700)));
    }

    #[test]
    fn stabilize__loading_tail_is_never_ready() {
        let base = Instant::now();
        let samples = [Sample::new(ms(base, 0), false), Sample::new(ms(base, 10), true)];
        assert!(!stabilize(&samples, WINDOW, ms(base, 10_000)));
        assert!(!stabilize(&[], WINDOW, ms(base, 10_000)));
    }

    #[test]
    fn stabilizer__churn_then_quiet_yields_one_ready_transition() {
        // given
        let base = Instant::now();
        let mut stabilizer = Stabilizer::new(WINDOW);
        let feed = [(0, true), (100, false), (200, true), (300, false)];
        let mut transitions = 0;
        let mut was_ready = false;

        // when
        for (offset, loading) in feed {
            stabilizer.observe(loading, ms(base, offset));
            let ready = stabilizer.poll(ms(base, offset));
            transitions += usize::from(ready && !was_ready);
            was_ready = ready;
        }
        for offset in (300..=1_500).step_by(50) {
            let ready = stabilizer.poll(ms(base, offset));
            transitions += usize::from(ready && !was_ready);
            was_ready = ready;
        }

        // then
        assert_eq!(transitions, 1);
        assert!(stabilizer.is_ready());
    }

    #[test]
    fn stabilizer__deadline_tracks_start_of_idle_run() {
        // given
        let base = Instant::now();
        let mut stabilizer = Stabilizer::new(WINDOW);

        // when
        stabilizer.observe(false, ms(base, 100));
        stabilizer.observe(false, ms(base, 400));

        // then
        assert_eq!(stabilizer.deadline(), Some(ms(base, 700)));
    }

    #[test]
    fn app_shell_gate__loader_never_returns_after_first_ready() {
        // given
        let base = Instant::now();
        let mut gate = AppShellGate::new(WINDOW);
        gate.observe(false, ms(base, 0));
        assert!(gate.poll(ms(base, 600)).ready);

        // when
        gate.observe(true, ms(base, 700));
        let state = gate.poll(ms(base, 700));

        // then
        assert!(!state.ready);
        assert!(state.has_shown_app);
        assert!(!state.show_loading_screen);
    }

    proptest! {
        #[test]
        fn app_shell_gate__latch_is_monotonic(
            steps in proptest::collection::vec((any::<bool>(), 0u64..400), 1..64)
        ) {
            let base = Instant::now();
            let mut gate = AppShellGate::new(WINDOW);
            let mut offset = 0;
            let mut shown = false;
            for (loading, gap) in steps {
                offset += gap;
                gate.observe(loading, ms(base, offset));
                let state = gate.poll(ms(base, offset));
                if shown {
                    prop_assert!(state.has_shown_app);
                    prop_assert!(!state.show_loading_screen);
                }
                shown = state.has_shown_app;
            }
        }

        #[test]
        fn stabilizer__agrees_with_pure_stabilize(
            steps in proptest::collection::vec((any::<bool>(), 0u64..400), 1..64)
        ) {
            let base = Instant::now();
            let mut stabilizer = Stabilizer::new(WINDOW);
            let mut samples = Vec::new();
            let mut offset = 0;
            for (loading, gap) in steps {
                offset += gap;
                let sample = Sample::new(ms(base, offset), loading);
                samples.push(sample);
                stabilizer.observe(loading, sample.at);
                prop_assert_eq!(
                    stabilizer.poll(sample.at),
                    stabilize(&samples, WINDOW, sample.at)
                );
            }
        }
    }
}
