//! SDP media engine
//!
//! Builds the offer carried in each INVITE and turns the answer into the
//! remote-stream view [`AudioSink`](crate::audio::AudioSink) binds to. Codec
//! negotiation is the exchange's business: the offer lists the static G.711
//! payloads plus telephone-event and the answer is not validated beyond its
//! media lines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::{SipError, SipResult};
use crate::endpoint::CallOptions;
use crate::media::{MediaConnection, MediaStream, MediaTrack, TrackKind, TrackReceiver};

/// Creates one [`SdpSession`] per call
#[derive(Debug, Clone)]
pub struct SdpMediaEngine {
    session_name: String,
}

impl Default for SdpMediaEngine {
    fn default() -> Self {
        Self {
            session_name: "switchboard".to_string(),
        }
    }
}

impl SdpMediaEngine {
    /// Engine whose offers carry `session_name` in the `s=` line
    pub fn new(session_name: impl Into<String>) -> Self {
        Self {
            session_name: session_name.into(),
        }
    }

    /// Media state for a new call
    pub fn new_session(&self, call_id: &str, options: &CallOptions) -> Arc<SdpSession> {
        let (stream_added, _) = broadcast::channel(8);
        let mut kinds = Vec::new();
        if options.audio {
            kinds.push(TrackKind::Audio);
        }
        if options.video {
            kinds.push(TrackKind::Video);
        }
        Arc::new(SdpSession {
            call_id: call_id.to_string(),
            offer: build_offer(&self.session_name, &kinds, options),
            offered: kinds,
            remote: RwLock::new(Vec::new()),
            stream_added,
            closed: AtomicBool::new(false),
        })
    }
}

/// Media side of one call
pub struct SdpSession {
    call_id: String,
    offer: String,
    offered: Vec<TrackKind>,
    remote: RwLock<Vec<MediaStream>>,
    stream_added: broadcast::Sender<MediaStream>,
    closed: AtomicBool,
}

impl SdpSession {
    /// The SDP offer for the INVITE body
    pub fn local_offer(&self) -> &str {
        &self.offer
    }

    /// Apply the SDP answer from the 200 OK
    ///
    /// Streams not seen before are announced on the stream-added channel.
    pub fn apply_answer(&self, sdp: &str) -> SipResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let streams = parse_remote_streams(&self.call_id, sdp)?;
        let mut remote = self.remote.write();
        for stream in streams {
            if remote.iter().any(|known| known.id == stream.id) {
                continue;
            }
            debug!("Remote stream {} for call {}", stream.id, self.call_id);
            remote.push(stream.clone());
            // Nobody listening is fine
            let _ = self.stream_added.send(stream);
        }
        Ok(())
    }

    /// Release the media state
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            trace!("Closing media for call {}", self.call_id);
            self.remote.write().clear();
        }
    }
}

impl MediaConnection for SdpSession {
    fn remote_streams(&self) -> Option<Vec<MediaStream>> {
        Some(self.remote.read().clone())
    }

    fn receivers(&self) -> Vec<TrackReceiver> {
        let remote = self.remote.read();
        self.offered
            .iter()
            .map(|kind| TrackReceiver {
                track: remote
                    .iter()
                    .flat_map(|s| s.tracks.iter())
                    .find(|t| t.kind == *kind)
                    .cloned(),
            })
            .collect()
    }

    fn on_stream_added(&self) -> Option<broadcast::Receiver<MediaStream>> {
        Some(self.stream_added.subscribe())
    }
}

fn build_offer(session_name: &str, kinds: &[TrackKind], options: &CallOptions) -> String {
    let session_id = rand::random::<u32>();
    let mut sdp = format!(
        "v=0\r\no=- {id} {id} IN IP4 0.0.0.0\r\ns={name}\r\nc=IN IP4 0.0.0.0\r\nt=0 0\r\n",
        id = session_id,
        name = session_name
    );
    for server in &options.ice_servers {
        for url in &server.urls {
            sdp.push_str(&format!("a=x-ice-server:{}\r\n", url));
        }
    }
    for (index, kind) in kinds.iter().enumerate() {
        match kind {
            TrackKind::Audio => {
                sdp.push_str("m=audio 9 RTP/AVP 0 8 101\r\n");
                sdp.push_str("a=rtpmap:0 PCMU/8000\r\na=rtpmap:8 PCMA/8000\r\n");
                sdp.push_str("a=rtpmap:101 telephone-event/8000\r\na=fmtp:101 0-16\r\n");
            }
            TrackKind::Video => {
                sdp.push_str("m=video 9 RTP/AVP 96\r\na=rtpmap:96 VP8/90000\r\n");
            }
        }
        sdp.push_str(&format!("a=mid:{}\r\na=sendrecv\r\n", index));
    }
    sdp
}

/// Remote streams described by an SDP answer
///
/// Media sections with port 0 are rejected sections and yield no track.
/// Tracks are grouped by their `a=msid` stream id; sections without one
/// share a stream named after the call.
pub fn parse_remote_streams(call_id: &str, sdp: &str) -> SipResult<Vec<MediaStream>> {
    if !sdp.trim_start().starts_with("v=") {
        return Err(SipError::Sdp("answer is not an SDP body".into()));
    }

    struct Section {
        kind: Option<TrackKind>,
        active: bool,
        mid: Option<String>,
        msid: Option<(String, String)>,
    }

    let mut sections: Vec<Section> = Vec::new();
    for line in sdp.lines().map(str::trim) {
        if let Some(media) = line.strip_prefix("m=") {
            let mut fields = media.split_whitespace();
            let kind = match fields.next() {
                Some("audio") => Some(TrackKind::Audio),
                Some("video") => Some(TrackKind::Video),
                _ => None,
            };
            let active = fields.next().is_some_and(|port| port != "0");
            sections.push(Section {
                kind,
                active,
                mid: None,
                msid: None,
            });
        } else if let Some(section) = sections.last_mut() {
            if let Some(mid) = line.strip_prefix("a=mid:") {
                section.mid = Some(mid.to_string());
            } else if let Some(msid) = line.strip_prefix("a=msid:") {
                let mut parts = msid.split_whitespace();
                if let (Some(stream), Some(track)) = (parts.next(), parts.next()) {
                    section.msid = Some((stream.to_string(), track.to_string()));
                }
            }
        }
    }

    let mut streams: Vec<MediaStream> = Vec::new();
    for (index, section) in sections.into_iter().enumerate() {
        let Some(kind) = section.kind.filter(|_| section.active) else {
            continue;
        };
        let (stream_id, track_id) = section.msid.unwrap_or_else(|| {
            let mid = section.mid.unwrap_or_else(|| index.to_string());
            (format!("remote-{}", call_id), format!("{}-{}", call_id, mid))
        });
        let track = MediaTrack { id: track_id, kind };
        match streams.iter_mut().find(|s| s.id == stream_id) {
            Some(stream) => stream.tracks.push(track),
            None => streams.push(MediaStream::new(stream_id, vec![track])),
        }
    }
    Ok(streams)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IceServer;

    const ANSWER: &str = "v=0\r\no=- 1 1 IN IP4 10.0.0.1\r\ns=Asterisk\r\nc=IN IP4 10.0.0.1\r\nt=0 0\r\nm=audio 14000 RTP/AVP 0\r\na=mid:0\r\na=sendrecv\r\nm=video 0 RTP/AVP 96\r\n";

    #[test]
    fn test_offer_is_audio_only_with_ice_servers() {
        let engine = SdpMediaEngine::default();
        let options = CallOptions::audio_only(vec![IceServer::new("stun:stun.example.com:3478")]);
        let session = engine.new_session("call-1", &options);

        let offer = session.local_offer();
        assert!(offer.contains("a=x-ice-server:stun:stun.example.com:3478\r\n"));
        assert_eq!(offer.matches("m=").count(), 1);
        assert!(offer.contains("m=audio 9 RTP/AVP 0 8 101"));
    }

    #[test]
    fn test_answer_exposes_active_sections_only() {
        let streams = parse_remote_streams("call-1", ANSWER).unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].id, "remote-call-1");
        assert_eq!(streams[0].tracks, vec![MediaTrack::audio("call-1-0")]);
    }

    #[tokio::test]
    async fn test_apply_answer_announces_new_streams_once() {
        let session = SdpMediaEngine::default().new_session("call-2", &CallOptions::audio_only(vec![]));
        let mut added = session.on_stream_added().unwrap();
        assert_eq!(session.receivers(), vec![TrackReceiver { track: None }]);

        session.apply_answer(ANSWER).unwrap();
        session.apply_answer(ANSWER).unwrap();

        assert_eq!(added.recv().await.unwrap().id, "remote-call-2");
        assert!(added.try_recv().is_err());
        assert_eq!(session.remote_streams().unwrap().len(), 1);
        assert!(session.receivers()[0].track.is_some());

        session.close();
        assert!(session.remote_streams().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_non_sdp_answer() {
        assert!(parse_remote_streams("c", "<html>").is_err());
    }
}
