//! Shared fakes for the client-core integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use switchboard_client_core::endpoint::{
    CallEvent, CallEventSender, CallHandle, CallOptions, EndpointEvent, EndpointEventSender, EndpointFactory,
    EndpointParams, PlacedCall, SignalingEndpoint,
};
use switchboard_client_core::media::{
    AudioOutput, MediaConnection, MediaStream, MediaTrack, PlaybackError, TrackReceiver,
};
use switchboard_client_core::{ClientEvent, ClientResult, RegistrationConfig, RegistrationState};

/// How fake endpoints behave once started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Connect and register immediately
    Register,
    /// Connect but never hear back from the registrar
    Silent,
}

/// Records every endpoint it builds
pub struct FakeFactory {
    script: Script,
    created: Mutex<Vec<Arc<FakeEndpoint>>>,
}

impl FakeFactory {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn created_urls(&self) -> Vec<String> {
        self.created.lock().iter().map(|e| e.url.clone()).collect()
    }

    pub fn endpoint(&self, index: usize) -> Arc<FakeEndpoint> {
        self.created.lock()[index].clone()
    }

    pub fn last_endpoint(&self) -> Arc<FakeEndpoint> {
        self.created.lock().last().cloned().expect("no endpoint created")
    }
}

impl EndpointFactory for FakeFactory {
    fn create(&self, params: EndpointParams, events: EndpointEventSender) -> ClientResult<Arc<dyn SignalingEndpoint>> {
        let endpoint = Arc::new(FakeEndpoint {
            url: params.transport_url,
            script: self.script,
            events,
            stopped: AtomicBool::new(false),
            dialed: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        });
        self.created.lock().push(endpoint.clone());
        Ok(endpoint)
    }
}

pub struct FakeEndpoint {
    pub url: String,
    script: Script,
    events: EndpointEventSender,
    stopped: AtomicBool,
    dialed: Mutex<Vec<String>>,
    calls: Mutex<Vec<(Arc<FakeCall>, CallEventSender)>>,
}

impl FakeEndpoint {
    pub fn emit(&self, event: EndpointEvent) {
        let _ = self.events.send(event);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn dialed(&self) -> Vec<String> {
        self.dialed.lock().clone()
    }

    pub fn call(&self, index: usize) -> Arc<FakeCall> {
        self.calls.lock()[index].0.clone()
    }

    /// Push an event onto the call's event channel
    pub fn call_event(&self, index: usize, event: CallEvent) {
        let calls = self.calls.lock();
        let (call, sender) = &calls[index];
        if event.is_terminal() {
            call.ended.store(true, Ordering::SeqCst);
        }
        let _ = sender.send(event);
    }
}

#[async_trait]
impl SignalingEndpoint for FakeEndpoint {
    fn start(&self) -> ClientResult<()> {
        self.emit(EndpointEvent::Connected);
        if self.script == Script::Register {
            self.emit(EndpointEvent::Registered);
        }
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    async fn place_call(&self, target: &str, _options: CallOptions) -> ClientResult<PlacedCall> {
        self.dialed.lock().push(target.to_string());
        let call = Arc::new(FakeCall {
            id: format!("fake-call-{}", self.dialed.lock().len()),
            media: Arc::new(FakeMedia::with_audio("remote-1")),
            ended: AtomicBool::new(false),
            terminations: AtomicUsize::new(0),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        self.calls.lock().push((call.clone(), tx));
        Ok(PlacedCall { handle: call, events: rx })
    }
}

pub struct FakeCall {
    id: String,
    media: Arc<FakeMedia>,
    ended: AtomicBool,
    terminations: AtomicUsize,
}

impl FakeCall {
    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }
}

impl CallHandle for FakeCall {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn media(&self) -> Arc<dyn MediaConnection> {
        self.media.clone()
    }

    fn terminate(&self) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        self.ended.store(true, Ordering::SeqCst);
    }

    fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

pub struct FakeMedia {
    streams: Vec<MediaStream>,
}

impl FakeMedia {
    pub fn with_audio(stream_id: &str) -> Self {
        Self {
            streams: vec![MediaStream::new(stream_id, vec![MediaTrack::audio(format!("{}-audio", stream_id))])],
        }
    }
}

impl MediaConnection for FakeMedia {
    fn remote_streams(&self) -> Option<Vec<MediaStream>> {
        Some(self.streams.clone())
    }

    fn receivers(&self) -> Vec<TrackReceiver> {
        Vec::new()
    }

    fn on_stream_added(&self) -> Option<broadcast::Receiver<MediaStream>> {
        None
    }
}

/// Output that records every source it is given
#[derive(Default)]
pub struct RecordingOutput {
    pub sources: Mutex<Vec<Option<MediaStream>>>,
    pub plays: AtomicUsize,
}

impl RecordingOutput {
    pub fn clears(&self) -> usize {
        self.sources.lock().iter().filter(|s| s.is_none()).count()
    }
}

impl AudioOutput for RecordingOutput {
    fn set_source(&self, stream: Option<MediaStream>) {
        self.sources.lock().push(stream);
    }

    fn play(&self) -> Result<(), PlaybackError> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Route client logs to the test output; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config() -> RegistrationConfig {
    RegistrationConfig::new("pbx.example.com", "9001", "s3cret")
}

/// Wait until a registration event reports `state`
pub async fn wait_for_state(events: &mut broadcast::Receiver<ClientEvent>, state: RegistrationState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(ClientEvent::RegistrationStateChanged(info)) if info.state == state => return,
                Ok(_) => continue,
                Err(e) => panic!("event bus closed while waiting for {}: {}", state, e),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", state));
}
