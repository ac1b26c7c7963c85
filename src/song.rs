//! Song snapshots and player status as reported by MPD

/// Song metadata as reported by MPD (`currentsong`, `listallinfo`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Song {
    pub uri: String,

    /// Queue id, absent for songs listed from the database
    pub id: Option<u32>,

    /// Duration in whole seconds
    pub duration: Option<u32>,

    /// Last modification time of the file (unix seconds)
    pub last_modified: Option<i64>,

    // Descriptive tags
    pub artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub track: Option<String>,
    pub name: Option<String>,
    pub genre: Option<String>,
    pub date: Option<String>,
    pub composer: Option<String>,
    pub performer: Option<String>,
    pub disc: Option<String>,
    pub mb_artist_id: Option<String>,
    pub mb_album_id: Option<String>,
    pub mb_track_id: Option<String>,
}

impl Song {
    /// Create a song with only a URI
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Whether the song carries the tags needed for statistics
    #[must_use]
    pub const fn has_required_tags(&self) -> bool {
        self.artist.is_some() && self.title.is_some()
    }

    /// Whether two snapshots refer to the same queue entry.
    ///
    /// Queue ids are compared when both sides have one, otherwise the URI.
    #[must_use]
    pub fn same_entry(&self, other: &Self) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            _ => self.uri == other.uri,
        }
    }

    /// Short label for log messages
    #[must_use]
    pub fn label(&self) -> String {
        match (&self.artist, &self.title) {
            (Some(artist), Some(title)) => format!("{artist} - {title}"),
            _ => self.uri.clone(),
        }
    }
}

/// Playback state reported by `status`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlayerState {
    #[default]
    Unknown,
    Stop,
    Play,
    Pause,
}

impl PlayerState {
    /// Parse the `state:` value of a status response
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "play" => Self::Play,
            "pause" => Self::Pause,
            "stop" => Self::Stop,
            _ => Self::Unknown,
        }
    }
}

/// Subset of MPD's `status` response the tracker needs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerStatus {
    pub state: PlayerState,

    /// Elapsed time of the current song in whole seconds
    pub elapsed: u32,
}

impl PlayerStatus {
    #[must_use]
    pub const fn new(state: PlayerState, elapsed: u32) -> Self {
        Self { state, elapsed }
    }
}
