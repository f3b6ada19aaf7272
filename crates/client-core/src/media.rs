//! Media descriptors and the traits at the media seam
//!
//! Endpoints expose remote media in one of two shapes: a set of remote
//! streams, or a list of track receivers from which a stream has to be
//! assembled. Some also announce streams late through a "stream added"
//! notification. [`MediaConnection`] covers all three so that
//! [`AudioSink`](crate::audio::AudioSink) can bind whichever is available.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

/// A single remote media track
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaTrack {
    /// Track identifier
    pub id: String,
    /// Track kind
    pub kind: TrackKind,
}

impl MediaTrack {
    /// Create an audio track
    pub fn audio(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TrackKind::Audio,
        }
    }

    /// Create a video track
    pub fn video(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TrackKind::Video,
        }
    }
}

/// A group of remote tracks bound to one output as a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    /// Stream identifier
    pub id: String,
    /// Tracks in the stream
    pub tracks: Vec<MediaTrack>,
}

impl MediaStream {
    /// Create a stream with an explicit identifier
    pub fn new(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    /// Assemble a synthetic stream from loose tracks
    pub fn from_tracks(tracks: Vec<MediaTrack>) -> Self {
        Self::new(format!("synthetic-{}", Uuid::new_v4()), tracks)
    }

    /// Whether the stream has no tracks
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Whether the stream carries at least one audio track
    pub fn has_audio(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == TrackKind::Audio)
    }
}

/// A receiver for one incoming track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackReceiver {
    /// The track, once negotiated
    pub track: Option<MediaTrack>,
}

impl TrackReceiver {
    /// A receiver with a negotiated track
    pub fn with_track(track: MediaTrack) -> Self {
        Self { track: Some(track) }
    }
}

/// Remote-media view of one call's media connection
pub trait MediaConnection: Send + Sync {
    /// All remote streams, or `None` when this connection does not expose streams
    fn remote_streams(&self) -> Option<Vec<MediaStream>>;

    /// Track receivers of the connection
    fn receivers(&self) -> Vec<TrackReceiver>;

    /// Subscribe to late stream announcements, when the connection emits them
    fn on_stream_added(&self) -> Option<broadcast::Receiver<MediaStream>>;
}

/// Errors starting playback on an output
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    /// The platform refused to start playback (autoplay policy and similar)
    #[error("playback rejected: {0}")]
    Rejected(String),

    /// The output device is gone
    #[error("audio output unavailable: {0}")]
    Unavailable(String),
}

/// A playable audio output (speaker element, device sink, recorder)
pub trait AudioOutput: Send + Sync {
    /// Bind a stream as the output source; `None` unbinds
    fn set_source(&self, stream: Option<MediaStream>);

    /// Start playback of the bound source
    fn play(&self) -> Result<(), PlaybackError>;
}
