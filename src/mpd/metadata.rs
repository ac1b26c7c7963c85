//! MPD response parsing

use chrono::DateTime;

use crate::protocol::Pairs;
use crate::song::{PlayerState, PlayerStatus, Song};

/// Parse a song listing (`currentsong`, `listallinfo`, ...).
///
/// A `file` line starts a new song. `directory` and `playlist` entries are
/// skipped along with their attribute lines.
#[must_use]
pub fn parse_songs(pairs: &Pairs) -> Vec<Song> {
    let mut songs = Vec::new();
    let mut current: Option<Song> = None;

    for (key, value) in pairs {
        match key.as_str() {
            "file" => {
                songs.extend(current.take());
                current = Some(Song::new(value.as_str()));
            }
            "directory" | "playlist" => songs.extend(current.take()),
            _ => {
                if let Some(song) = current.as_mut() {
                    apply_tag(song, key, value);
                }
            }
        }
    }
    songs.extend(current);
    songs
}

/// Parse a single-song response; `None` when nothing is playing.
#[must_use]
pub fn parse_song(pairs: &Pairs) -> Option<Song> {
    parse_songs(pairs).into_iter().next()
}

fn apply_tag(song: &mut Song, key: &str, value: &str) {
    // Multi-valued tags repeat the key; the first value wins.
    let slot = match key {
        "Artist" => &mut song.artist,
        "Album" => &mut song.album,
        "Title" => &mut song.title,
        "Track" => &mut song.track,
        "Name" => &mut song.name,
        "Genre" => &mut song.genre,
        "Date" => &mut song.date,
        "Composer" => &mut song.composer,
        "Performer" => &mut song.performer,
        "Disc" => &mut song.disc,
        "MUSICBRAINZ_ARTISTID" => &mut song.mb_artist_id,
        "MUSICBRAINZ_ALBUMID" => &mut song.mb_album_id,
        "MUSICBRAINZ_TRACKID" => &mut song.mb_track_id,
        "Id" => {
            song.id = value.parse().ok();
            return;
        }
        // `duration` carries fractions and supersedes the older `Time`.
        "duration" => {
            song.duration = parse_seconds(value).or(song.duration);
            return;
        }
        "Time" => {
            if song.duration.is_none() {
                song.duration = value.parse().ok();
            }
            return;
        }
        "Last-Modified" => {
            song.last_modified = DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|t| t.timestamp());
            return;
        }
        _ => return,
    };
    if slot.is_none() {
        *slot = Some(value.to_string());
    }
}

/// Whole seconds from a possibly fractional value.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_seconds(value: &str) -> Option<u32> {
    let secs: f64 = value.parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(secs.floor() as u32)
    } else {
        None
    }
}

/// Parse the `status` response.
#[must_use]
pub fn parse_status(pairs: &Pairs) -> PlayerStatus {
    let mut status = PlayerStatus::default();
    let mut elapsed = None;
    let mut legacy_elapsed = None;

    for (key, value) in pairs {
        match key.as_str() {
            "state" => status.state = PlayerState::parse(value),
            "elapsed" => elapsed = parse_seconds(value),
            // "<elapsed>:<total>"
            "time" => {
                legacy_elapsed = value.split(':').next().and_then(|e| e.parse().ok());
            }
            _ => {}
        }
    }
    status.elapsed = elapsed.or(legacy_elapsed).unwrap_or(0);
    status
}

/// Subsystem names from an `idle` response.
#[must_use]
pub fn parse_subsystems(pairs: &Pairs) -> Vec<String> {
    pairs
        .iter()
        .filter(|(key, _)| key == "changed")
        .map(|(_, value)| value.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(text: &str) -> Pairs {
        text.lines()
            .filter_map(|l| l.split_once(": "))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_current_song() {
        let song = parse_song(&pairs(
            "file: music/a.flac\n\
             Last-Modified: 2021-03-04T05:06:07Z\n\
             Artist: First\n\
             Artist: Second\n\
             Title: Song\n\
             Album: Record\n\
             Genre: Jazz\n\
             MUSICBRAINZ_TRACKID: 1234-abcd\n\
             Time: 201\n\
             duration: 200.734\n\
             Pos: 3\n\
             Id: 42",
        ))
        .unwrap();

        assert_eq!(song.uri, "music/a.flac");
        assert_eq!(song.artist.as_deref(), Some("First"));
        assert_eq!(song.title.as_deref(), Some("Song"));
        assert_eq!(song.genre.as_deref(), Some("Jazz"));
        assert_eq!(song.mb_track_id.as_deref(), Some("1234-abcd"));
        assert_eq!(song.duration, Some(200));
        assert_eq!(song.id, Some(42));
        assert_eq!(song.last_modified, Some(1_614_834_367));
    }

    #[test]
    fn test_time_used_without_duration() {
        let song = parse_song(&pairs("file: a.mp3\nTime: 187")).unwrap();
        assert_eq!(song.duration, Some(187));
    }

    #[test]
    fn test_nothing_playing() {
        assert!(parse_song(&Vec::new()).is_none());
    }

    #[test]
    fn test_listing_skips_directories_and_playlists() {
        let songs = parse_songs(&pairs(
            "directory: music\n\
             Last-Modified: 2021-03-04T05:06:07Z\n\
             file: music/a.mp3\n\
             Title: A\n\
             playlist: music/list.m3u\n\
             Title: not a song tag\n\
             file: music/b.mp3\n\
             Title: B",
        ));
        assert_eq!(songs.len(), 2);
        assert_eq!(songs[0].title.as_deref(), Some("A"));
        assert_eq!(songs[1].uri, "music/b.mp3");
        assert_eq!(songs[1].title.as_deref(), Some("B"));
        assert!(songs[0].last_modified.is_none());
    }

    #[test]
    fn test_parse_status() {
        let status = parse_status(&pairs(
            "volume: 80\nstate: play\nsong: 3\nsongid: 42\ntime: 12:200\nelapsed: 12.873",
        ));
        assert_eq!(status.state, PlayerState::Play);
        assert_eq!(status.elapsed, 12);

        let status = parse_status(&pairs("state: pause\ntime: 33:200"));
        assert_eq!(status.state, PlayerState::Pause);
        assert_eq!(status.elapsed, 33);

        let status = parse_status(&pairs("state: stop"));
        assert_eq!(status, PlayerStatus::new(PlayerState::Stop, 0));
    }

    #[test]
    fn test_parse_subsystems() {
        let changed = parse_subsystems(&pairs("changed: player\nchanged: mixer"));
        assert_eq!(changed, vec!["player", "mixer"]);
    }
}
