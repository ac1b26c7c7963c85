//! Now-playing state and the "played long enough" rule

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::song::{PlayerState, PlayerStatus, Song};

/// A play always counts once it has run longer than this (seconds).
pub const ALWAYS_COUNT_AFTER_SECS: u64 = 240;

/// Songs shorter than this (seconds) only count through the 240s rule.
pub const MIN_COUNTED_DURATION_SECS: u64 = 30;

/// Decide whether a playback counts toward statistics.
///
/// `elapsed > 240s OR (duration >= 30s AND elapsed > duration / 2)`.
/// Unknown durations are treated as zero.
#[must_use]
pub fn played_long_enough(elapsed_secs: u64, duration_secs: Option<u32>) -> bool {
    let duration = u64::from(duration_secs.unwrap_or(0));
    elapsed_secs > ALWAYS_COUNT_AFTER_SECS
        || (duration >= MIN_COUNTED_DURATION_SECS && elapsed_secs > duration / 2)
}

/// Pausable elapsed-time counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stopwatch {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl Stopwatch {
    /// Reset to zero and start running.
    pub fn start(&mut self, now: Instant) {
        self.accumulated = Duration::ZERO;
        self.running_since = Some(now);
    }

    /// Stop counting, keeping the time so far. No-op when already frozen.
    pub fn freeze(&mut self, now: Instant) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += now.saturating_duration_since(since);
        }
    }

    /// Continue counting from the frozen value.
    pub fn resume(&mut self, now: Instant) {
        if self.running_since.is_none() {
            self.running_since = Some(now);
        }
    }

    #[must_use]
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.accumulated
            + self
                .running_since
                .map_or(Duration::ZERO, |since| now.saturating_duration_since(since))
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running_since.is_some()
    }
}

/// Externally visible tracker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Stopped,
    Playing,
    Paused,
}

/// What the caller should do with the Update Engine after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackAction {
    /// A new song started; make sure its rows exist (no play counted).
    Sighted(Song),
    /// A song finished and played long enough; count it.
    Played { song: Song, elapsed: Duration },
}

/// Tracks the song currently playing and when it should be counted.
#[derive(Debug, Clone, Default)]
pub struct NowPlaying {
    current: Option<Song>,
    timer: Stopwatch,
    paused: bool,
}

impl NowPlaying {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn state(&self) -> TrackerState {
        match (&self.current, self.paused) {
            (None, _) => TrackerState::Stopped,
            (Some(_), false) => TrackerState::Playing,
            (Some(_), true) => TrackerState::Paused,
        }
    }

    /// Song being tracked, if any.
    #[must_use]
    pub const fn current(&self) -> Option<&Song> {
        self.current.as_ref()
    }

    /// Time the tracked song has been playing.
    #[must_use]
    pub fn played_duration(&self, now: Instant) -> Duration {
        self.timer.elapsed(now)
    }

    /// Feed a player state change and collect the resulting actions.
    pub fn on_player(
        &mut self,
        song: Option<&Song>,
        status: &PlayerStatus,
        now: Instant,
    ) -> Vec<TrackAction> {
        let mut actions = Vec::new();
        match (status.state, song) {
            (PlayerState::Pause, _) => self.pause(now),
            (PlayerState::Play, Some(song)) => self.play(song, status.elapsed, now, &mut actions),
            _ => self.stop(now, &mut actions),
        }
        actions
    }

    fn pause(&mut self, now: Instant) {
        if self.current.is_some() && !self.paused {
            self.timer.freeze(now);
            self.paused = true;
            debug!("Paused after {}s", self.timer.elapsed(now).as_secs());
        }
    }

    fn stop(&mut self, now: Instant, actions: &mut Vec<TrackAction>) {
        if self.current.is_some() {
            debug!("Playback stopped");
        }
        self.submit_current(now, actions);
    }

    fn play(&mut self, song: &Song, reported_elapsed: u32, now: Instant, actions: &mut Vec<TrackAction>) {
        let same = self.current.as_ref().is_some_and(|c| c.same_entry(song));
        if !same {
            self.submit_current(now, actions);
            self.timer.start(now);
            self.paused = false;
            debug!("Started: {}", song.label());
            actions.push(TrackAction::Sighted(song.clone()));
            self.current = Some(song.clone());
            return;
        }

        if self.paused {
            self.timer.resume(now);
            self.paused = false;
            debug!("Resumed: {}", song.label());
        }

        // Player position went backwards relative to our timer: the song
        // was repeated (or seeked back), so finish it and start over.
        if self.timer.elapsed(now).as_secs() > u64::from(reported_elapsed) {
            debug!("Repeat detected: {}", song.label());
            self.submit_current(now, actions);
            self.timer.start(now);
        }
        self.current = Some(song.clone());
    }

    fn submit_current(&mut self, now: Instant, actions: &mut Vec<TrackAction>) {
        let Some(song) = self.current.take() else {
            return;
        };
        let elapsed = self.timer.elapsed(now);
        self.timer = Stopwatch::default();
        self.paused = false;

        if played_long_enough(elapsed.as_secs(), song.duration) {
            info!("Counting play: {} ({}s played)", song.label(), elapsed.as_secs());
            actions.push(TrackAction::Played { song, elapsed });
        } else {
            debug!(
                "Not counting {}: played {}s of {}s",
                song.label(),
                elapsed.as_secs(),
                song.duration.unwrap_or(0)
            );
        }
    }
}
