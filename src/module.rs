//! Event modules driven by MPD idle notifications

use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::error::Error;
use crate::song::{PlayerState, PlayerStatus, Song};
use crate::track::{NowPlaying, TrackAction};

/// What a module asks the event source to do next.
///
/// Ordered by precedence when several modules answer the same event:
/// `ReconnectNow` beats `Reconnect`, which beats `Success`. `Unload` only
/// affects the module that returned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventResult {
    Success,
    Reconnect,
    ReconnectNow,
    Unload,
}

/// MPD idle subsystems a module can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Database,
    StoredPlaylist,
    Queue,
    Player,
    Mixer,
    Output,
    Options,
    Update,
}

impl Subsystem {
    /// Map a `changed:` value; subsystems without a module hook yield `None`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "database" => Self::Database,
            "stored_playlist" => Self::StoredPlaylist,
            "playlist" => Self::Queue,
            "player" => Self::Player,
            "mixer" => Self::Mixer,
            "output" => Self::Output,
            "options" => Self::Options,
            "update" => Self::Update,
            _ => return None,
        })
    }
}

/// Player state fetched after an idle wakeup.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub status: PlayerStatus,
    pub song: Option<Song>,
}

/// An event consumer. Only the player hook is mandatory.
#[async_trait]
pub trait Module: Send {
    fn name(&self) -> &str;

    async fn event_player(&mut self, snapshot: &Snapshot) -> EventResult;

    async fn event_database(&mut self, _snapshot: &Snapshot) -> EventResult {
        EventResult::Success
    }

    async fn event_stored_playlist(&mut self, _snapshot: &Snapshot) -> EventResult {
        EventResult::Success
    }

    async fn event_queue(&mut self, _snapshot: &Snapshot) -> EventResult {
        EventResult::Success
    }

    async fn event_mixer(&mut self, _snapshot: &Snapshot) -> EventResult {
        EventResult::Success
    }

    async fn event_output(&mut self, _snapshot: &Snapshot) -> EventResult {
        EventResult::Success
    }

    async fn event_options(&mut self, _snapshot: &Snapshot) -> EventResult {
        EventResult::Success
    }

    async fn event_update(&mut self, _snapshot: &Snapshot) -> EventResult {
        EventResult::Success
    }

    /// Called once before the module is dropped.
    async fn destroy(&mut self) {}
}

/// Loaded modules, called in registration order.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Box<dyn Module>>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Box<dyn Module>) {
        info!("Loaded module {}", module.name());
        self.modules.push(module);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Deliver one subsystem event to every module.
    ///
    /// Modules answering `Unload` are destroyed and removed. The strongest
    /// reconnect request among the rest is returned.
    pub async fn dispatch(&mut self, subsystem: Subsystem, snapshot: &Snapshot) -> EventResult {
        let mut outcome = EventResult::Success;
        let mut i = 0;
        while i < self.modules.len() {
            let module = &mut self.modules[i];
            let result = match subsystem {
                Subsystem::Database => module.event_database(snapshot).await,
                Subsystem::StoredPlaylist => module.event_stored_playlist(snapshot).await,
                Subsystem::Queue => module.event_queue(snapshot).await,
                Subsystem::Player => module.event_player(snapshot).await,
                Subsystem::Mixer => module.event_mixer(snapshot).await,
                Subsystem::Output => module.event_output(snapshot).await,
                Subsystem::Options => module.event_options(snapshot).await,
                Subsystem::Update => module.event_update(snapshot).await,
            };

            if result == EventResult::Unload {
                let mut module = self.modules.remove(i);
                info!("Unloading module {}", module.name());
                module.destroy().await;
                continue;
            }
            outcome = outcome.max(result);
            i += 1;
        }
        outcome
    }

    /// Destroy every module, e.g. on shutdown.
    pub async fn destroy_all(&mut self) {
        for mut module in self.modules.drain(..) {
            debug!("Destroying module {}", module.name());
            module.destroy().await;
        }
    }
}

// ============================================================================
// Statistics module
// ============================================================================

/// Feeds player events to the now-playing tracker and writes the results.
pub struct StatsModule {
    db: Database,
    tracker: NowPlaying,
}

impl StatsModule {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db,
            tracker: NowPlaying::new(),
        }
    }

    async fn apply(&self, actions: Vec<TrackAction>) {
        for action in actions {
            let (song, increment) = match &action {
                TrackAction::Sighted(song) => (song, false),
                TrackAction::Played { song, .. } => (song, true),
            };
            match self.db.process(song, increment).await {
                Ok(()) => {}
                // Expected for untagged streams; only a real play is worth a warning.
                Err(Error::NoTags(uri)) if !increment => {
                    debug!("Not recording `{}': missing tags", uri);
                }
                Err(e @ Error::NoTags(_)) => warn!("{}", e),
                Err(e) => error!("Failed to record {}: {}", song.label(), e),
            }
        }
    }
}

#[async_trait]
impl Module for StatsModule {
    fn name(&self) -> &str {
        "stats"
    }

    async fn event_player(&mut self, snapshot: &Snapshot) -> EventResult {
        let actions = self
            .tracker
            .on_player(snapshot.song.as_ref(), &snapshot.status, Instant::now());
        self.apply(actions).await;
        EventResult::Success
    }

    /// Count the song in progress, if it already qualifies.
    async fn destroy(&mut self) {
        let stopped = PlayerStatus::new(PlayerState::Stop, 0);
        let actions = self.tracker.on_player(None, &stopped, Instant::now());
        self.apply(actions).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records the subsystems it saw and answers with a fixed result.
    struct Probe {
        name: &'static str,
        answer: EventResult,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Module for Probe {
        fn name(&self) -> &str {
            self.name
        }

        async fn event_player(&mut self, _snapshot: &Snapshot) -> EventResult {
            self.seen.lock().unwrap().push(self.name);
            self.answer
        }

        async fn destroy(&mut self) {
            self.seen.lock().unwrap().push("destroyed");
        }
    }

    fn probe(name: &'static str, answer: EventResult, seen: &Arc<Mutex<Vec<&'static str>>>) -> Box<dyn Module> {
        Box::new(Probe {
            name,
            answer,
            seen: Arc::clone(seen),
        })
    }

    #[test]
    fn test_subsystem_parse() {
        assert_eq!(Subsystem::parse("playlist"), Some(Subsystem::Queue));
        assert_eq!(Subsystem::parse("stored_playlist"), Some(Subsystem::StoredPlaylist));
        assert_eq!(Subsystem::parse("sticker"), None);
    }

    #[test]
    fn test_result_precedence() {
        assert!(EventResult::ReconnectNow > EventResult::Reconnect);
        assert!(EventResult::Reconnect > EventResult::Success);
    }

    #[tokio::test]
    async fn test_dispatch_order_and_precedence() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ModuleRegistry::new();
        registry.register(probe("a", EventResult::Reconnect, &seen));
        registry.register(probe("b", EventResult::ReconnectNow, &seen));
        registry.register(probe("c", EventResult::Success, &seen));

        let result = registry.dispatch(Subsystem::Player, &Snapshot::default()).await;
        assert_eq!(result, EventResult::ReconnectNow);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_unload_removes_module() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ModuleRegistry::new();
        registry.register(probe("a", EventResult::Unload, &seen));
        registry.register(probe("b", EventResult::Success, &seen));

        let result = registry.dispatch(Subsystem::Player, &Snapshot::default()).await;
        assert_eq!(result, EventResult::Success);
        assert_eq!(registry.len(), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "destroyed", "b"]);

        registry.dispatch(Subsystem::Player, &Snapshot::default()).await;
        assert_eq!(*seen.lock().unwrap(), vec!["a", "destroyed", "b", "b"]);
    }

    #[tokio::test]
    async fn test_default_hooks_succeed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ModuleRegistry::new();
        registry.register(probe("a", EventResult::ReconnectNow, &seen));

        let result = registry.dispatch(Subsystem::Mixer, &Snapshot::default()).await;
        assert_eq!(result, EventResult::Success);
        assert!(seen.lock().unwrap().is_empty());
    }

    mod stats {
        use super::*;
        use crate::types::{EntityKind, Permission};

        fn playing(song: &Song) -> Snapshot {
            Snapshot {
                status: PlayerStatus::new(PlayerState::Play, 0),
                song: Some(song.clone()),
            }
        }

        #[tokio::test]
        async fn test_sighting_creates_rows_without_counting() {
            let db = Database::open_in_memory().unwrap();
            let mut module = StatsModule::new(db.clone());
            let song = Song {
                artist: Some("X".to_string()),
                title: Some("Y".to_string()),
                duration: Some(200),
                ..Song::new("a.mp3")
            };

            assert_eq!(module.event_player(&playing(&song)).await, EventResult::Success);

            let info = db
                .list_info(Permission::SELECT, EntityKind::Song, "uri = 'a.mp3'")
                .await
                .unwrap();
            assert_eq!(info.len(), 1);
            assert_eq!(info[0].play_count, 0);
        }

        #[tokio::test]
        async fn test_untagged_song_is_ignored() {
            let db = Database::open_in_memory().unwrap();
            let mut module = StatsModule::new(db.clone());

            let stream = Song::new("http://radio.example/stream");
            assert_eq!(module.event_player(&playing(&stream)).await, EventResult::Success);
            module.destroy().await;

            let rows = db.list(Permission::SELECT, EntityKind::Song, "1").await.unwrap();
            assert!(rows.is_empty());
        }
    }
}
