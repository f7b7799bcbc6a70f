use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};

use crate::{
    queue, CommandError, CommandResult, Config, PlaybackState, RepeatMode, Track, VenueStatus,
};

/// A playback command sent by a client to a venue.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    PlayTrack {
        track: Track,
    },
    Pause,
    Resume,
    Stop,
    SkipNext,
    Previous,
    Seek {
        position: f64,
    },
    UpdateVolume {
        volume: u8,
    },
    AddToQueue {
        track: Track,
        position: Option<usize>,
        /// Whether the track goes into the priority queue
        priority: bool,
    },
    RemoveFromQueue {
        index: usize,
        priority: bool,
    },
    ClearQueue {
        priority: bool,
    },
    /// Toggles shuffling. A seed is resolved before the command is applied
    /// so that retries produce the same order.
    Shuffle {
        seed: Option<u64>,
    },
    UpdatePlayerSettings {
        repeat_mode: Option<RepeatMode>,
        crossfade_seconds: Option<f64>,
    },
    /// The host player finished the current track.
    TrackEnded,
}

/// A track was inserted into one of a venue's queues.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueInsert {
    pub track: Track,
    pub position: usize,
    pub priority: bool,
}

/// What a successfully applied command produced besides the new state.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Applied {
    pub queue_insert: Option<QueueInsert>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackPayload {
    track: Track,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueTrackPayload {
    track: Track,
    position: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeekPayload {
    position: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumePayload {
    volume: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemovePayload {
    index: usize,
    #[serde(default)]
    priority: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearPayload {
    #[serde(default)]
    priority: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShufflePayload {
    seed: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsPayload {
    repeat_mode: Option<RepeatMode>,
    crossfade_seconds: Option<f64>,
}

impl Command {
    /// Parses a command from its wire name and payload.
    pub fn parse(name: &str, data: Value) -> CommandResult<Self> {
        let command = match name {
            "play_track" => {
                let TrackPayload { track } = payload(name, data)?;
                Self::PlayTrack { track }
            }
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "stop" => Self::Stop,
            "skip_next" => Self::SkipNext,
            "previous" => Self::Previous,
            "track_ended" => Self::TrackEnded,
            "seek" => {
                let SeekPayload { position } = payload(name, data)?;
                Self::Seek { position }
            }
            "update_volume" => {
                let VolumePayload { volume } = payload(name, data)?;

                let volume = u8::try_from(volume)
                    .ok()
                    .filter(|v| *v <= 100)
                    .ok_or_else(|| {
                        CommandError::invalid_payload(format!(
                            "volume must be between 0 and 100, got {}",
                            volume
                        ))
                    })?;

                Self::UpdateVolume { volume }
            }
            "add_to_queue" | "add_to_priority_queue" => {
                let QueueTrackPayload { track, position } = payload(name, data)?;

                Self::AddToQueue {
                    track,
                    position,
                    priority: name == "add_to_priority_queue",
                }
            }
            "remove_from_queue" => {
                let RemovePayload { index, priority } = payload(name, data)?;
                Self::RemoveFromQueue { index, priority }
            }
            "clear_queue" => {
                let ClearPayload { priority } = payload(name, data)?;
                Self::ClearQueue { priority }
            }
            "shuffle" => {
                let ShufflePayload { seed } = payload(name, data)?;
                Self::Shuffle { seed }
            }
            "update_player_settings" => {
                let SettingsPayload {
                    repeat_mode,
                    crossfade_seconds,
                } = payload(name, data)?;

                Self::UpdatePlayerSettings {
                    repeat_mode,
                    crossfade_seconds,
                }
            }
            other => return Err(CommandError::UnknownCommand(other.to_string())),
        };

        command.validate()?;
        Ok(command)
    }

    /// The wire name of the command, also used as the activity event type.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PlayTrack { .. } => "play_track",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::SkipNext => "skip_next",
            Self::Previous => "previous",
            Self::Seek { .. } => "seek",
            Self::UpdateVolume { .. } => "update_volume",
            Self::AddToQueue {
                priority: false, ..
            } => "add_to_queue",
            Self::AddToQueue { priority: true, .. } => "add_to_priority_queue",
            Self::RemoveFromQueue { .. } => "remove_from_queue",
            Self::ClearQueue { .. } => "clear_queue",
            Self::Shuffle { .. } => "shuffle",
            Self::UpdatePlayerSettings { .. } => "update_player_settings",
            Self::TrackEnded => "track_ended",
        }
    }

    /// Whether users who neither own the venue nor administer it may send this command.
    pub fn is_open_to_guests(&self) -> bool {
        matches!(
            self,
            Self::AddToQueue {
                priority: false,
                ..
            }
        )
    }

    /// Fixes any random input so that applying the command is repeatable.
    pub fn resolve(self) -> Self {
        match self {
            Self::Shuffle { seed: None } => Self::Shuffle {
                seed: Some(rand::random()),
            },
            other => other,
        }
    }

    /// A short description of the payload for the activity log.
    pub fn summary(&self) -> Value {
        match self {
            Self::PlayTrack { track } => json!({ "track": track_summary(track) }),
            Self::Seek { position } => json!({ "position": position }),
            Self::UpdateVolume { volume } => json!({ "volume": volume }),
            Self::AddToQueue {
                track, position, ..
            } => json!({ "track": track_summary(track), "position": position }),
            Self::RemoveFromQueue { index, priority } => {
                json!({ "index": index, "priority": priority })
            }
            Self::ClearQueue { priority } => json!({ "priority": priority }),
            Self::Shuffle { seed } => json!({ "seed": seed }),
            Self::UpdatePlayerSettings {
                repeat_mode,
                crossfade_seconds,
            } => json!({
                "repeatMode": repeat_mode.map(|m| m.as_str()),
                "crossfadeSeconds": crossfade_seconds,
            }),
            _ => json!({}),
        }
    }

    fn validate(&self) -> CommandResult<()> {
        match self {
            Self::PlayTrack { track } | Self::AddToQueue { track, .. } => track.validate(),
            Self::Seek { position } if !position.is_finite() || *position < 0. => Err(
                CommandError::invalid_payload("position must be a non-negative number"),
            ),
            Self::UpdatePlayerSettings {
                repeat_mode: None,
                crossfade_seconds: None,
            } => Err(CommandError::invalid_payload(
                "update_player_settings requires repeatMode or crossfadeSeconds",
            )),
            Self::UpdatePlayerSettings {
                crossfade_seconds: Some(seconds),
                ..
            } if !seconds.is_finite() || *seconds < 0. => Err(CommandError::invalid_payload(
                "crossfadeSeconds must be a non-negative number",
            )),
            _ => Ok(()),
        }
    }

    /// Applies the command to the given state.
    ///
    /// On error the state may have been partially modified, so callers
    /// should apply to a copy and only keep it on success.
    pub fn apply(&self, state: &mut PlaybackState, config: &Config) -> CommandResult<Applied> {
        let mut applied = Applied::default();

        match self {
            Self::PlayTrack { track } => {
                if let Some(current) = state.now_playing.take() {
                    queue::push_history(&mut state.history, current, config.history_size);
                }

                state.start(track.clone());
            }
            Self::Pause => match state.status {
                VenueStatus::Playing | VenueStatus::Paused => state.status = VenueStatus::Paused,
                status => return Err(self.invalid_in(status)),
            },
            Self::Resume => {
                if state.now_playing.is_none() {
                    return Err(self.invalid_in(state.status));
                }

                state.status = VenueStatus::Playing;
            }
            Self::Stop => {
                if state.status == VenueStatus::Idle {
                    return Err(self.invalid_in(state.status));
                }

                state.status = VenueStatus::Stopped;
            }
            Self::SkipNext => advance(state, config),
            Self::Previous => match state.history.pop() {
                Some(previous) => {
                    if state.now_playing.is_some()
                        && state.active_queue.len() >= config.max_queue_size
                    {
                        state.history.push(previous);
                        return Err(CommandError::QueueFull {
                            limit: config.max_queue_size,
                        });
                    }

                    if let Some(current) = state.now_playing.take() {
                        state.active_queue.insert(0, current);
                    }

                    state.start(previous);
                }
                // Nothing to go back to, so restart the current track
                None => match state.now_playing.clone() {
                    Some(current) => state.start(current),
                    None => return Err(self.invalid_in(state.status)),
                },
            },
            Self::Seek { position } => {
                let track = state
                    .now_playing
                    .as_ref()
                    .filter(|_| state.status.has_position())
                    .ok_or_else(|| self.invalid_in(state.status))?;

                if let Some(duration) = track.known_duration() {
                    if *position > duration {
                        return Err(CommandError::invalid_payload(format!(
                            "position {} is past the end of the track ({})",
                            position, duration
                        )));
                    }
                }

                state.current_time_seconds = *position;
            }
            Self::UpdateVolume { volume } => state.volume = *volume,
            Self::AddToQueue {
                track,
                position,
                priority,
            } => {
                let target = queue_mut(state, *priority);

                if target.len() >= config.max_queue_size {
                    return Err(CommandError::QueueFull {
                        limit: config.max_queue_size,
                    });
                }

                let position = position.unwrap_or(target.len());
                *target = queue::insert(target, track.clone(), Some(position))?;

                applied.queue_insert = Some(QueueInsert {
                    track: track.clone(),
                    position,
                    priority: *priority,
                });
            }
            Self::RemoveFromQueue { index, priority } => {
                let target = queue_mut(state, *priority);
                *target = queue::remove(target, *index)?;
            }
            Self::ClearQueue { priority } => queue_mut(state, *priority).clear(),
            Self::Shuffle { seed } => {
                state.is_shuffled = !state.is_shuffled;

                if state.is_shuffled {
                    let seed = seed.unwrap_or_else(rand::random);
                    state.active_queue = queue::shuffle(&state.active_queue, seed);
                }
            }
            Self::UpdatePlayerSettings {
                repeat_mode,
                crossfade_seconds,
            } => {
                if let Some(mode) = repeat_mode {
                    state.player_settings.repeat_mode = *mode;
                }

                if let Some(seconds) = crossfade_seconds {
                    state.player_settings.crossfade_seconds = *seconds;
                }
            }
            Self::TrackEnded => {
                let current = state
                    .now_playing
                    .clone()
                    .ok_or_else(|| self.invalid_in(state.status))?;

                if state.player_settings.repeat_mode == RepeatMode::One {
                    state.start(current)
                } else {
                    advance(state, config)
                }
            }
        }

        state.normalize();
        Ok(applied)
    }

    fn invalid_in(&self, status: VenueStatus) -> CommandError {
        CommandError::InvalidTransition {
            command: self.name(),
            status,
        }
    }
}

/// Moves the current track into history and starts the next one, if any.
fn advance(state: &mut PlaybackState, config: &Config) {
    if let Some(current) = state.now_playing.take() {
        if state.player_settings.repeat_mode == RepeatMode::All {
            state.active_queue.push(current.clone());
        }

        queue::push_history(&mut state.history, current, config.history_size);
    }

    let (next, priority, active) = queue::pop_next(&state.priority_queue, &state.active_queue);

    state.priority_queue = priority;
    state.active_queue = active;

    // A repeated track only stays queued while there is room for it
    if state.active_queue.len() > config.max_queue_size {
        state.active_queue.pop();
    }

    match next {
        Some(track) => state.start(track),
        None => state.status = VenueStatus::Idle,
    }
}

fn queue_mut(state: &mut PlaybackState, priority: bool) -> &mut Vec<Track> {
    if priority {
        &mut state.priority_queue
    } else {
        &mut state.active_queue
    }
}

fn payload<T: DeserializeOwned>(command: &str, data: Value) -> CommandResult<T> {
    let data = match data {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };

    serde_json::from_value(data)
        .map_err(|e| CommandError::invalid_payload(format!("{}: {}", command, e)))
}

fn track_summary(track: &Track) -> Value {
    json!({ "videoId": track.video_id, "title": track.title })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply_all(state: &mut PlaybackState, commands: &[Command]) {
        let config = Config::default();

        for command in commands {
            command.apply(state, &config).expect("command applies");
        }
    }

    fn add(title: &str) -> Command {
        Command::AddToQueue {
            track: Track::mock(title),
            position: None,
            priority: false,
        }
    }

    fn playing(title: &str) -> PlaybackState {
        let mut state = PlaybackState::default();
        apply_all(
            &mut state,
            &[Command::PlayTrack {
                track: Track::mock(title),
            }],
        );
        state
    }

    #[test]
    fn test_parse_requires_payload() {
        assert!(matches!(
            Command::parse("play_track", Value::Null),
            Err(CommandError::InvalidPayload(_))
        ));
        assert!(matches!(
            Command::parse("seek", json!({ "position": "soon" })),
            Err(CommandError::InvalidPayload(_))
        ));
        assert!(matches!(
            Command::parse("update_volume", json!({ "volume": 101 })),
            Err(CommandError::InvalidPayload(_))
        ));
        assert!(matches!(
            Command::parse("remove_from_queue", json!({ "index": -1 })),
            Err(CommandError::InvalidPayload(_))
        ));
        assert_eq!(
            Command::parse("pause", Value::Null),
            Ok(Command::Pause),
            "payload-less commands accept no data"
        );
    }

    #[test]
    fn test_parse_unknown_command() {
        assert_eq!(
            Command::parse("rewind", Value::Null),
            Err(CommandError::UnknownCommand("rewind".to_string()))
        );
    }

    #[test]
    fn test_parse_priority_queue() {
        let command = Command::parse(
            "add_to_priority_queue",
            json!({ "track": Track::mock("vip") }),
        )
        .expect("parses");

        assert_eq!(command.name(), "add_to_priority_queue");
        assert!(!command.is_open_to_guests());
        assert!(add("a").is_open_to_guests());
    }

    #[test]
    fn test_add_add_skip() {
        let mut state = PlaybackState::default();

        apply_all(&mut state, &[add("a"), add("b"), Command::SkipNext]);

        assert_eq!(state.now_playing, Some(Track::mock("a")));
        assert_eq!(state.active_queue, vec![Track::mock("b")]);
        assert_eq!(state.status, VenueStatus::Playing);
        assert_eq!(state.current_time_seconds, 0.);
    }

    #[test]
    fn test_skip_next_consumes_priority_first() {
        let mut state = PlaybackState::default();

        apply_all(
            &mut state,
            &[
                add("a"),
                Command::AddToQueue {
                    track: Track::mock("vip"),
                    position: None,
                    priority: true,
                },
                Command::SkipNext,
            ],
        );

        assert_eq!(state.now_playing, Some(Track::mock("vip")));
        assert_eq!(state.active_queue, vec![Track::mock("a")]);
        assert!(state.priority_queue.is_empty());
    }

    #[test]
    fn test_skip_next_on_empty_goes_idle() {
        let mut state = playing("a");

        apply_all(&mut state, &[Command::SkipNext]);

        assert_eq!(state.status, VenueStatus::Idle);
        assert!(state.now_playing.is_none());
        assert_eq!(state.history, vec![Track::mock("a")], "played track is remembered");
    }

    #[test]
    fn test_seek() {
        let config = Config::default();
        let mut state = playing("a");

        assert!(matches!(
            Command::parse("seek", json!({ "position": -5 })),
            Err(CommandError::InvalidPayload(_))
        ));

        Command::Seek { position: 42. }
            .apply(&mut state, &config)
            .expect("seek applies");

        assert_eq!(state.current_time_seconds, 42.);
        assert_eq!(state.status, VenueStatus::Playing, "status is unchanged");

        assert!(
            matches!(
                Command::Seek { position: 500. }.apply(&mut state, &config),
                Err(CommandError::InvalidPayload(_))
            ),
            "cannot seek past the end of the track"
        );
    }

    #[test]
    fn test_seek_without_track() {
        let mut state = PlaybackState::default();

        assert_eq!(
            Command::Seek { position: 1. }.apply(&mut state, &Config::default()),
            Err(CommandError::InvalidTransition {
                command: "seek",
                status: VenueStatus::Idle
            })
        );
    }

    #[test]
    fn test_pause_resume_stop() {
        let config = Config::default();
        let mut state = playing("a");

        apply_all(&mut state, &[Command::Seek { position: 10. }, Command::Pause]);
        assert_eq!(state.status, VenueStatus::Paused);
        assert_eq!(state.current_time_seconds, 10., "pausing keeps the cursor");

        apply_all(&mut state, &[Command::Resume]);
        assert_eq!(state.status, VenueStatus::Playing);

        apply_all(&mut state, &[Command::Stop]);
        assert_eq!(state.status, VenueStatus::Stopped);
        assert_eq!(state.current_time_seconds, 0.);

        assert!(
            Command::Pause.apply(&mut state, &config).is_err(),
            "cannot pause a stopped venue"
        );
        assert!(
            Command::Stop.apply(&mut PlaybackState::default(), &config).is_err(),
            "cannot stop an idle venue"
        );
        assert!(
            Command::Resume.apply(&mut PlaybackState::default(), &config).is_err(),
            "cannot resume without a track"
        );
    }

    #[test]
    fn test_previous_uses_history() {
        let mut state = PlaybackState::default();

        apply_all(
            &mut state,
            &[add("a"), add("b"), Command::SkipNext, Command::SkipNext],
        );
        assert_eq!(state.now_playing, Some(Track::mock("b")));

        apply_all(&mut state, &[Command::Previous]);

        assert_eq!(state.now_playing, Some(Track::mock("a")));
        assert_eq!(
            state.active_queue,
            vec![Track::mock("b")],
            "skipped-to track returns to the front of the queue"
        );
        assert_eq!(state.status, VenueStatus::Playing);
    }

    #[test]
    fn test_previous_without_history_restarts() {
        let config = Config::default();
        let mut state = playing("a");
        state.history.clear();
        state.current_time_seconds = 30.;

        Command::Previous.apply(&mut state, &config).unwrap();

        assert_eq!(state.now_playing, Some(Track::mock("a")));
        assert_eq!(state.current_time_seconds, 0.);

        assert!(Command::Previous
            .apply(&mut PlaybackState::default(), &config)
            .is_err());
    }

    #[test]
    fn test_requeued_tracks_respect_queue_bound() {
        let config = Config {
            max_queue_size: 2,
            ..Default::default()
        };

        let mut state = PlaybackState::default();
        state.player_settings.repeat_mode = RepeatMode::All;

        for command in [add("a"), add("b"), Command::SkipNext] {
            command.apply(&mut state, &config).unwrap();
        }

        Command::AddToQueue {
            track: Track::mock("vip"),
            position: None,
            priority: true,
        }
        .apply(&mut state, &config)
        .unwrap();
        Command::AddToQueue {
            track: Track::mock("c"),
            position: None,
            priority: false,
        }
        .apply(&mut state, &config)
        .unwrap();

        Command::SkipNext.apply(&mut state, &config).unwrap();

        assert_eq!(state.now_playing, Some(Track::mock("vip")));
        assert_eq!(
            state.active_queue,
            vec![Track::mock("b"), Track::mock("c")],
            "no room to requeue the finished track"
        );

        state.history.push(Track::mock("old"));

        let before = state.clone();
        assert_eq!(
            Command::Previous.apply(&mut state, &config),
            Err(CommandError::QueueFull { limit: 2 })
        );
        assert_eq!(state, before, "a rejected previous changes nothing");

        let mut roomy = state.clone();
        roomy.active_queue.pop();
        Command::Previous.apply(&mut roomy, &config).unwrap();

        assert_eq!(roomy.now_playing, Some(Track::mock("old")));
        assert_eq!(roomy.active_queue.len(), 2);
    }

    #[test]
    fn test_add_then_remove_round_trip() {
        let mut state = PlaybackState::default();
        apply_all(&mut state, &[add("a"), add("b")]);

        let before = state.active_queue.clone();

        apply_all(
            &mut state,
            &[
                Command::AddToQueue {
                    track: Track::mock("c"),
                    position: Some(0),
                    priority: false,
                },
                Command::RemoveFromQueue {
                    index: 0,
                    priority: false,
                },
            ],
        );

        assert_eq!(state.active_queue, before);
    }

    #[test]
    fn test_remove_at_len_is_out_of_range() {
        let mut state = PlaybackState::default();
        apply_all(&mut state, &[add("a")]);

        assert_eq!(
            Command::RemoveFromQueue {
                index: 1,
                priority: false
            }
            .apply(&mut state, &Config::default()),
            Err(CommandError::OutOfRange { index: 1, len: 1 })
        );
    }

    #[test]
    fn test_queue_full() {
        let config = Config {
            max_queue_size: 1,
            ..Default::default()
        };
        let mut state = PlaybackState::default();

        add("a").apply(&mut state, &config).unwrap();

        assert_eq!(
            add("b").apply(&mut state, &config),
            Err(CommandError::QueueFull { limit: 1 })
        );
    }

    #[test]
    fn test_add_reports_insert() {
        let mut state = PlaybackState::default();
        let applied = add("a").apply(&mut state, &Config::default()).unwrap();

        assert_eq!(
            applied.queue_insert,
            Some(QueueInsert {
                track: Track::mock("a"),
                position: 0,
                priority: false
            })
        );
    }

    #[test]
    fn test_shuffle_toggle() {
        let mut state = PlaybackState::default();
        let titles = ["a", "b", "c", "d", "e", "f"];
        apply_all(&mut state, &titles.map(add));

        let before = state.active_queue.clone();

        apply_all(&mut state, &[Command::Shuffle { seed: Some(3) }]);
        assert!(state.is_shuffled);
        assert_eq!(state.active_queue, queue::shuffle(&before, 3));

        let shuffled = state.active_queue.clone();
        apply_all(&mut state, &[Command::Shuffle { seed: Some(3) }]);
        assert!(!state.is_shuffled);
        assert_eq!(state.active_queue, shuffled, "toggling off keeps the order");
    }

    #[test]
    fn test_resolve_fixes_seed() {
        let resolved = Command::Shuffle { seed: None }.resolve();

        assert!(matches!(resolved, Command::Shuffle { seed: Some(_) }));
        assert_eq!(resolved.clone().resolve(), resolved, "resolving is stable");
    }

    #[test]
    fn test_repeat_modes() {
        let mut state = playing("a");
        apply_all(
            &mut state,
            &[Command::UpdatePlayerSettings {
                repeat_mode: Some(RepeatMode::One),
                crossfade_seconds: None,
            }],
        );

        apply_all(&mut state, &[add("b"), Command::TrackEnded]);
        assert_eq!(
            state.now_playing,
            Some(Track::mock("a")),
            "repeat one restarts the track"
        );

        apply_all(
            &mut state,
            &[
                Command::UpdatePlayerSettings {
                    repeat_mode: Some(RepeatMode::All),
                    crossfade_seconds: Some(2.5),
                },
                Command::TrackEnded,
            ],
        );
        assert_eq!(state.now_playing, Some(Track::mock("b")));
        assert_eq!(
            state.active_queue,
            vec![Track::mock("a")],
            "repeat all cycles the finished track"
        );
        assert_eq!(state.player_settings.crossfade_seconds, 2.5);
    }

    #[test]
    fn test_empty_settings_rejected() {
        assert!(matches!(
            Command::parse("update_player_settings", json!({})),
            Err(CommandError::InvalidPayload(_))
        ));
    }
}
