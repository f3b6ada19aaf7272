//! Remote audio attachment
//!
//! [`AudioSink`] binds the remote side of a supervisory call to an
//! [`AudioOutput`]. It is a scoped resource: [`AudioSink::attach`] acquires
//! the output and the stream-added subscription, and [`AudioSink::detach`]
//! (or dropping the sink) releases both. Detaching is idempotent and the
//! output is cleared exactly once.
//!
//! Binding order on attach and on every [`AudioSink::rebind`]:
//!
//! 1. the first remote stream, when the connection exposes streams
//! 2. a synthetic stream assembled from the track receivers
//!
//! Streams announced later through the legacy stream-added notification
//! replace the bound source as they arrive.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::media::{AudioOutput, MediaConnection, MediaStream};

/// Binding state shared with the stream-added listener
struct Binding {
    output: Arc<dyn AudioOutput>,
    detached: bool,
    bound: Option<MediaStream>,
    clears: usize,
}

impl Binding {
    fn bind(&mut self, session_id: &str, stream: MediaStream) {
        if self.detached {
            trace!("Ignoring stream {} for detached session {}", stream.id, session_id);
            return;
        }
        debug!("🔊 Binding stream {} ({} tracks) for session {}", stream.id, stream.tracks.len(), session_id);
        self.output.set_source(Some(stream.clone()));
        self.bound = Some(stream);
        if let Err(e) = self.output.play() {
            // Not a call-control failure; the session stays up without local playback
            warn!("Playback did not start for session {}: {}", session_id, e);
        }
    }
}

/// Remote audio bound to one output for the lifetime of one session
pub struct AudioSink {
    session_id: String,
    media: Arc<dyn MediaConnection>,
    binding: Arc<Mutex<Binding>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl AudioSink {
    /// Attach a session's remote media to an output
    ///
    /// Must be called inside a Tokio runtime when the connection emits
    /// stream-added notifications, since the listener runs as a task.
    pub fn attach(
        session_id: impl Into<String>,
        media: Arc<dyn MediaConnection>,
        output: Arc<dyn AudioOutput>,
    ) -> Self {
        let session_id = session_id.into();
        let binding = Arc::new(Mutex::new(Binding {
            output,
            detached: false,
            bound: None,
            clears: 0,
        }));

        let listener = media.on_stream_added().map(|mut added| {
            let binding = binding.clone();
            let session_id = session_id.clone();
            tokio::spawn(async move {
                loop {
                    match added.recv().await {
                        Ok(stream) => binding.lock().bind(&session_id, stream),
                        Err(RecvError::Lagged(skipped)) => {
                            debug!("Stream-added listener for {} skipped {} announcements", session_id, skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            })
        });

        let sink = Self {
            session_id,
            media,
            binding,
            listener: Mutex::new(listener),
        };
        sink.rebind();
        sink
    }

    /// Probe the connection again and bind whatever it currently exposes
    ///
    /// Returns whether a source is bound afterwards.
    pub fn rebind(&self) -> bool {
        let mut binding = self.binding.lock();
        if binding.detached {
            return false;
        }
        match current_stream(self.media.as_ref()) {
            Some(stream) => {
                if binding.bound.as_ref() != Some(&stream) {
                    binding.bind(&self.session_id, stream);
                }
                true
            }
            None => {
                trace!("No remote media yet for session {}", self.session_id);
                binding.bound.is_some()
            }
        }
    }

    /// Release the output and the stream-added subscription
    ///
    /// Safe to call any number of times.
    pub fn detach(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        let mut binding = self.binding.lock();
        if binding.detached {
            return;
        }
        binding.detached = true;
        binding.bound = None;
        binding.output.set_source(None);
        binding.clears += 1;
        debug!("🔇 Detached audio for session {}", self.session_id);
    }

    /// Whether [`detach`](Self::detach) has run
    pub fn is_detached(&self) -> bool {
        self.binding.lock().detached
    }

    /// The currently bound stream
    pub fn bound_stream(&self) -> Option<MediaStream> {
        self.binding.lock().bound.clone()
    }

    /// How many times the output has been cleared (0 or 1)
    pub fn release_count(&self) -> usize {
        self.binding.lock().clears
    }
}

impl Drop for AudioSink {
    fn drop(&mut self) {
        self.detach();
    }
}

fn current_stream(media: &dyn MediaConnection) -> Option<MediaStream> {
    if let Some(first) = media.remote_streams().and_then(|streams| streams.into_iter().next()) {
        return Some(first);
    }
    let tracks: Vec<_> = media
        .receivers()
        .into_iter()
        .filter_map(|receiver| receiver.track)
        .collect();
    if tracks.is_empty() {
        None
    } else {
        Some(MediaStream::from_tracks(tracks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaTrack, PlaybackError, TrackReceiver};
    use tokio::sync::broadcast;

    #[derive(Default)]
    struct RecordingOutput {
        sources: Mutex<Vec<Option<MediaStream>>>,
        reject_play: bool,
    }

    impl AudioOutput for RecordingOutput {
        fn set_source(&self, stream: Option<MediaStream>) {
            self.sources.lock().push(stream);
        }

        fn play(&self) -> Result<(), PlaybackError> {
            if self.reject_play {
                Err(PlaybackError::Rejected("autoplay blocked".into()))
            } else {
                Ok(())
            }
        }
    }

    struct FakeConnection {
        streams: Option<Vec<MediaStream>>,
        receivers: Vec<TrackReceiver>,
        added: Option<broadcast::Sender<MediaStream>>,
    }

    impl MediaConnection for FakeConnection {
        fn remote_streams(&self) -> Option<Vec<MediaStream>> {
            self.streams.clone()
        }

        fn receivers(&self) -> Vec<TrackReceiver> {
            self.receivers.clone()
        }

        fn on_stream_added(&self) -> Option<broadcast::Receiver<MediaStream>> {
            self.added.as_ref().map(|tx| tx.subscribe())
        }
    }

    #[tokio::test]
    async fn test_binds_first_remote_stream() {
        let first = MediaStream::new("s1", vec![MediaTrack::audio("a1")]);
        let second = MediaStream::new("s2", vec![MediaTrack::audio("a2")]);
        let media = Arc::new(FakeConnection {
            streams: Some(vec![first.clone(), second]),
            receivers: vec![],
            added: None,
        });
        let output = Arc::new(RecordingOutput::default());

        let sink = AudioSink::attach("sess", media, output.clone());

        assert_eq!(sink.bound_stream(), Some(first.clone()));
        assert_eq!(output.sources.lock().as_slice(), &[Some(first)]);
    }

    #[tokio::test]
    async fn test_falls_back_to_receivers() {
        let media = Arc::new(FakeConnection {
            streams: Some(vec![]),
            receivers: vec![
                TrackReceiver { track: None },
                TrackReceiver::with_track(MediaTrack::audio("rx-audio")),
            ],
            added: None,
        });
        let output = Arc::new(RecordingOutput::default());

        let sink = AudioSink::attach("sess", media, output);

        let bound = sink.bound_stream().expect("synthetic stream bound");
        assert!(bound.id.starts_with("synthetic-"));
        assert_eq!(bound.tracks, vec![MediaTrack::audio("rx-audio")]);
    }

    #[tokio::test]
    async fn test_rejected_playback_is_swallowed() {
        let media = Arc::new(FakeConnection {
            streams: Some(vec![MediaStream::new("s1", vec![MediaTrack::audio("a1")])]),
            receivers: vec![],
            added: None,
        });
        let output = Arc::new(RecordingOutput {
            reject_play: true,
            ..Default::default()
        });

        let sink = AudioSink::attach("sess", media, output);
        assert!(sink.bound_stream().is_some());
    }

    #[tokio::test]
    async fn test_stream_added_rebinds_until_detached() {
        let (tx, _keep) = broadcast::channel(4);
        let media = Arc::new(FakeConnection {
            streams: None,
            receivers: vec![],
            added: Some(tx.clone()),
        });
        let output = Arc::new(RecordingOutput::default());
        let sink = AudioSink::attach("sess", media, output.clone());
        assert!(sink.bound_stream().is_none());

        let late = MediaStream::new("late", vec![MediaTrack::audio("a")]);
        tx.send(late.clone()).expect("listener subscribed");
        for _ in 0..10 {
            if sink.bound_stream().is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(sink.bound_stream(), Some(late));

        sink.detach();
        let _ = tx.send(MediaStream::new("after", vec![MediaTrack::audio("b")]));
        tokio::task::yield_now().await;

        let sources = output.sources.lock();
        assert_eq!(sources.last(), Some(&None));
        assert!(!sources.iter().flatten().any(|s| s.id == "after"));
    }

    #[tokio::test]
    async fn test_detach_is_idempotent() {
        let media = Arc::new(FakeConnection {
            streams: None,
            receivers: vec![],
            added: None,
        });
        let output = Arc::new(RecordingOutput::default());
        let sink = AudioSink::attach("sess", media, output.clone());

        sink.detach();
        sink.detach();
        drop(sink);

        assert_eq!(output.sources.lock().iter().filter(|s| s.is_none()).count(), 1);
    }
}
