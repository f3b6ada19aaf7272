//! WebSocket SIP endpoint
//!
//! [`WsSipEndpoint`] runs one driver task per endpoint. The driver owns the
//! socket and all SIP state; the endpoint and its call handles talk to it
//! through a command channel, and it reports back through the endpoint and
//! per-call event channels handed out by the registration controller.
//!
//! The driver never reconnects on its own: a lost socket is reported as
//! [`EndpointEvent::Disconnected`] and recovery is the controller's decision.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use url::Url;
use uuid::Uuid;

use super::digest::{self, DigestChallenge, DigestRequest};
use super::message::{self, addr_uri, header_param, tag_param, SipMessage, SipRequest, SipResponse};
use super::sdp::{SdpMediaEngine, SdpSession};
use crate::endpoint::{
    CallEvent, CallEventSender, CallHandle, CallOptions, EndpointEvent, EndpointEventSender, EndpointFactory,
    EndpointParams, PlacedCall, SignalingEndpoint,
};
use crate::error::{ClientError, ClientResult};
use crate::media::MediaConnection;

/// RFC 7118 subprotocol
const SIP_WS_SUBPROTOCOL: &str = "sip";

/// Default `User-Agent` header
pub const DEFAULT_USER_AGENT: &str = concat!("switchboard/", env!("CARGO_PKG_VERSION"));

/// Challenges answered per request before giving up
const MAX_AUTH_ATTEMPTS: u32 = 2;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// Builds [`WsSipEndpoint`]s
#[derive(Debug, Clone)]
pub struct WsEndpointFactory {
    user_agent: String,
    media: SdpMediaEngine,
}

impl Default for WsEndpointFactory {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            media: SdpMediaEngine::default(),
        }
    }
}

impl WsEndpointFactory {
    /// Factory with a custom `User-Agent`
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Factory with a custom media engine
    pub fn with_media_engine(mut self, media: SdpMediaEngine) -> Self {
        self.media = media;
        self
    }
}

impl EndpointFactory for WsEndpointFactory {
    fn create(&self, params: EndpointParams, events: EndpointEventSender) -> ClientResult<Arc<dyn SignalingEndpoint>> {
        let url = Url::parse(&params.transport_url)
            .map_err(|e| ClientError::transport(&params.transport_url, e.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") || url.host_str().is_none() {
            return Err(ClientError::transport(
                &params.transport_url,
                "not a ws:// or wss:// URL",
            ));
        }
        Ok(Arc::new(WsSipEndpoint {
            params,
            events,
            user_agent: self.user_agent.clone(),
            media: self.media.clone(),
            commands: Mutex::new(None),
            driver: Mutex::new(None),
        }))
    }
}

enum Command {
    PlaceCall {
        target: String,
        options: CallOptions,
        reply: oneshot::Sender<ClientResult<PlacedCall>>,
    },
    Terminate {
        call_id: String,
    },
    Shutdown,
}

/// SIP user agent over one WebSocket
pub struct WsSipEndpoint {
    params: EndpointParams,
    events: EndpointEventSender,
    user_agent: String,
    media: SdpMediaEngine,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl SignalingEndpoint for WsSipEndpoint {
    fn start(&self) -> ClientResult<()> {
        let mut commands = self.commands.lock();
        if commands.is_some() {
            return Ok(());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Driver::new(
            self.params.clone(),
            self.events.clone(),
            self.user_agent.clone(),
            self.media.clone(),
            tx.clone(),
        );
        *self.driver.lock() = Some(tokio::spawn(driver.run(rx)));
        *commands = Some(tx);
        Ok(())
    }

    fn stop(&self) {
        if let Some(commands) = self.commands.lock().take() {
            if commands.send(Command::Shutdown).is_err() {
                trace!("Driver for {} already gone", self.params.transport_url);
            }
        }
        // The driver unregisters and closes on its own; keep the handle detached
        self.driver.lock().take();
    }

    async fn place_call(&self, target: &str, options: CallOptions) -> ClientResult<PlacedCall> {
        let commands = self
            .commands
            .lock()
            .clone()
            .ok_or_else(|| ClientError::transport(&self.params.transport_url, "endpoint is not running"))?;
        let (reply, response) = oneshot::channel();
        commands
            .send(Command::PlaceCall {
                target: target.to_string(),
                options,
                reply,
            })
            .map_err(|_| ClientError::transport(&self.params.transport_url, "endpoint driver stopped"))?;
        response
            .await
            .map_err(|_| ClientError::transport(&self.params.transport_url, "endpoint driver stopped"))?
    }
}

impl Drop for WsSipEndpoint {
    fn drop(&mut self) {
        self.stop();
    }
}

struct WsCallHandle {
    call_id: String,
    media: Arc<SdpSession>,
    commands: mpsc::UnboundedSender<Command>,
    ended: Arc<AtomicBool>,
}

impl CallHandle for WsCallHandle {
    fn id(&self) -> String {
        self.call_id.clone()
    }

    fn media(&self) -> Arc<dyn MediaConnection> {
        self.media.clone()
    }

    fn terminate(&self) {
        if self.ended.load(Ordering::Acquire) {
            return;
        }
        let _ = self.commands.send(Command::Terminate {
            call_id: self.call_id.clone(),
        });
    }

    fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DialogState {
    Calling,
    Early,
    Confirmed,
}

struct Dialog {
    request_uri: String,
    local_tag: String,
    remote_tag: Option<String>,
    remote_target: Option<String>,
    to_header: String,
    cseq: u32,
    branch: String,
    state: DialogState,
    cancelled: bool,
    auth_attempts: u32,
    media: Arc<SdpSession>,
    events: CallEventSender,
    ended: Arc<AtomicBool>,
}

struct RegistrationState {
    call_id: String,
    local_tag: String,
    cseq: u32,
    auth_attempts: u32,
    challenge: Option<(DigestChallenge, bool)>,
    nonce_count: u32,
    registered: bool,
    refresh_at: Option<Instant>,
}

struct Driver {
    params: EndpointParams,
    events: EndpointEventSender,
    user_agent: String,
    media: SdpMediaEngine,
    commands: mpsc::UnboundedSender<Command>,
    via_host: String,
    registration: RegistrationState,
    dialogs: HashMap<String, Dialog>,
}

impl Driver {
    fn new(
        params: EndpointParams,
        events: EndpointEventSender,
        user_agent: String,
        media: SdpMediaEngine,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            params,
            events,
            user_agent,
            media,
            commands,
            via_host: format!("{}.invalid", random_token()),
            registration: RegistrationState {
                call_id: Uuid::new_v4().to_string(),
                local_tag: random_token(),
                cseq: 0,
                auth_attempts: 0,
                challenge: None,
                nonce_count: 0,
                registered: false,
                refresh_at: None,
            },
            dialogs: HashMap::new(),
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let url = self.params.transport_url.clone();
        let timeout = self.params.config.connection_timeout();

        let stream = tokio::select! {
            result = tokio::time::timeout(timeout, connect(&url)) => match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(reason)) => {
                    warn!("WebSocket connect to {} failed: {}", url, reason);
                    self.emit(EndpointEvent::Disconnected { reason: Some(reason) });
                    return;
                }
                Err(_) => {
                    warn!("WebSocket connect to {} timed out", url);
                    self.emit(EndpointEvent::Disconnected { reason: Some("connect timed out".into()) });
                    return;
                }
            },
            _ = wait_for_shutdown(&mut commands) => {
                debug!("Endpoint stopped while connecting to {}", url);
                return;
            }
        };

        info!("🔌 Connected to {}", url);
        self.emit(EndpointEvent::Connected);

        let (mut sink, mut inbound) = stream.split();
        if let Err(reason) = self.send_register(&mut sink, self.params.config.refresh_interval_secs).await {
            self.on_transport_lost(reason);
            return;
        }

        loop {
            tokio::select! {
                frame = inbound.next() => {
                    let text = match frame {
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(WsMessage::Binary(data))) => String::from_utf8_lossy(&data).into_owned(),
                        Some(Ok(WsMessage::Close(_))) | None => {
                            self.on_transport_lost("connection closed by peer".into());
                            return;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            self.on_transport_lost(e.to_string());
                            return;
                        }
                    };
                    if text.trim().is_empty() {
                        // CRLF keep-alive
                        continue;
                    }
                    let result = match message::parse(&text) {
                        Ok(SipMessage::Response(response)) => self.on_response(&mut sink, response).await,
                        Ok(SipMessage::Request(request)) => self.on_request(&mut sink, request).await,
                        Err(e) => {
                            warn!("Dropping unparseable frame: {}", e);
                            Ok(())
                        }
                    };
                    if let Err(reason) = result {
                        self.on_transport_lost(reason);
                        return;
                    }
                }
                command = commands.recv() => {
                    let result = match command {
                        Some(Command::PlaceCall { target, options, reply }) => {
                            let placed = self.place_call(&mut sink, &target, options).await;
                            // Placement only fails when the socket refused the INVITE
                            let failed = placed.as_ref().err().map(|e| e.to_string());
                            let _ = reply.send(placed);
                            failed.map_or(Ok(()), Err)
                        }
                        Some(Command::Terminate { call_id }) => self.terminate(&mut sink, &call_id).await,
                        Some(Command::Shutdown) | None => {
                            self.shutdown(&mut sink).await;
                            return;
                        }
                    };
                    if let Err(reason) = result {
                        self.on_transport_lost(reason);
                        return;
                    }
                }
                _ = wait_until(self.registration.refresh_at) => {
                    self.registration.refresh_at = None;
                    debug!("Refreshing registration");
                    if let Err(reason) = self.send_register(&mut sink, self.params.config.refresh_interval_secs).await {
                        self.on_transport_lost(reason);
                        return;
                    }
                }
            }
        }
    }

    fn emit(&self, event: EndpointEvent) {
        let _ = self.events.send(event);
    }

    fn config_domain(&self) -> &str {
        self.params.config.domain.trim()
    }

    fn registrar_uri(&self) -> String {
        format!("sip:{}", self.config_domain())
    }

    fn from_header(&self, tag: &str) -> String {
        match self.params.config.display_name.as_deref().filter(|n| !n.is_empty()) {
            Some(name) => format!("\"{}\" <{}>;tag={}", name, self.params.identity_uri, tag),
            None => format!("<{}>;tag={}", self.params.identity_uri, tag),
        }
    }

    fn contact(&self) -> String {
        format!(
            "<sip:{}@{};transport=ws>",
            self.params.config.extension.trim(),
            self.via_host
        )
    }

    fn via(&self, branch: &str) -> String {
        let transport = if self.params.transport_url.starts_with("wss") { "WSS" } else { "WS" };
        format!("SIP/2.0/{} {};branch={};rport", transport, self.via_host, branch)
    }

    #[allow(clippy::too_many_arguments)]
    fn base_request(&self, method: &str, uri: &str, branch: &str, from_tag: &str, to: &str, call_id: &str, cseq: u32) -> SipRequest {
        SipRequest::new(method, uri)
            .header("Via", self.via(branch))
            .header("Max-Forwards", "70")
            .header("From", self.from_header(from_tag))
            .header("To", to)
            .header("Call-ID", call_id)
            .header("CSeq", format!("{} {}", cseq, method))
            .header("User-Agent", self.user_agent.as_str())
    }

    fn digest_header(&mut self, method: &str, uri: &str) -> Option<(String, String)> {
        let (challenge, proxy) = self.registration.challenge.clone()?;
        self.registration.nonce_count += 1;
        let cnonce = random_token();
        let value = digest::authorization(
            &challenge,
            &DigestRequest {
                username: self.params.config.extension.trim(),
                password: &self.params.config.password,
                method,
                uri,
                nonce_count: self.registration.nonce_count,
                cnonce: &cnonce,
            },
        );
        let name = if proxy { "Proxy-Authorization" } else { "Authorization" };
        Some((name.to_string(), value))
    }

    async fn send(&self, sink: &mut WsSink, text: String) -> Result<(), String> {
        trace!("SIP >>\n{}", text);
        sink.send(WsMessage::Text(text))
            .await
            .map_err(|e| format!("send failed: {}", e))
    }

    async fn send_register(&mut self, sink: &mut WsSink, expires: u32) -> Result<(), String> {
        self.registration.cseq += 1;
        let uri = self.registrar_uri();
        let to = format!("<{}>", self.params.identity_uri);
        let mut request = self
            .base_request(
                "REGISTER",
                &uri,
                &branch(),
                &self.registration.local_tag.clone(),
                &to,
                &self.registration.call_id.clone(),
                self.registration.cseq,
            )
            .header("Contact", self.contact())
            .header("Expires", expires.to_string());
        if let Some((name, value)) = self.digest_header("REGISTER", &uri) {
            request = request.header(name, value);
        }
        debug!("REGISTER {} (expires {})", self.params.identity_uri, expires);
        self.send(sink, request.to_string()).await
    }

    async fn on_response(&mut self, sink: &mut WsSink, response: SipResponse) -> Result<(), String> {
        let call_id = response.headers.get("Call-ID").unwrap_or_default().to_string();
        let method = response
            .headers
            .get("CSeq")
            .and_then(|cseq| cseq.split_whitespace().nth(1))
            .unwrap_or_default()
            .to_string();

        match method.as_str() {
            "REGISTER" if call_id == self.registration.call_id => self.on_register_response(sink, response).await,
            "INVITE" => self.on_invite_response(sink, &call_id, response).await,
            _ => {
                trace!("{} response {} for {}", method, response.status, call_id);
                Ok(())
            }
        }
    }

    async fn on_register_response(&mut self, sink: &mut WsSink, response: SipResponse) -> Result<(), String> {
        if response.is_provisional() {
            return Ok(());
        }

        if matches!(response.status, 401 | 407) {
            self.registration.auth_attempts += 1;
            if self.registration.auth_attempts > MAX_AUTH_ATTEMPTS {
                self.registration.auth_attempts = 0;
                self.registration.registered = false;
                self.emit(EndpointEvent::RegistrationFailed {
                    cause: format!("{} {}", response.status, response.reason),
                });
                return Ok(());
            }
            let header = if response.status == 407 { "Proxy-Authenticate" } else { "WWW-Authenticate" };
            match response.headers.get(header).map(DigestChallenge::parse) {
                Some(Ok(challenge)) => {
                    self.registration.challenge = Some((challenge, response.status == 407));
                    self.registration.nonce_count = 0;
                    return self.send_register(sink, self.params.config.refresh_interval_secs).await;
                }
                Some(Err(e)) => {
                    self.emit(EndpointEvent::RegistrationFailed { cause: e.to_string() });
                    return Ok(());
                }
                None => {
                    self.emit(EndpointEvent::RegistrationFailed {
                        cause: format!("{} without a challenge", response.status),
                    });
                    return Ok(());
                }
            }
        }

        self.registration.auth_attempts = 0;
        if response.is_success() {
            let granted = granted_expires(&response).unwrap_or(self.params.config.refresh_interval_secs);
            if granted == 0 {
                return Ok(());
            }
            // Refresh ahead of expiry
            let refresh = Duration::from_secs(u64::from(granted.max(2)) * 9 / 10);
            self.registration.refresh_at = Some(Instant::now() + refresh);
            if !self.registration.registered {
                info!("✅ Registered {} for {}s", self.params.identity_uri, granted);
            }
            self.registration.registered = true;
            self.emit(EndpointEvent::Registered);
        } else {
            warn!("REGISTER rejected: {} {}", response.status, response.reason);
            self.registration.registered = false;
            self.registration.refresh_at = None;
            self.emit(EndpointEvent::RegistrationFailed {
                cause: format!("{} {}", response.status, response.reason),
            });
        }
        Ok(())
    }

    async fn place_call(&mut self, sink: &mut WsSink, target: &str, options: CallOptions) -> ClientResult<PlacedCall> {
        let request_uri = if target.starts_with("sip:") || target.starts_with("sips:") {
            target.to_string()
        } else {
            format!("sip:{}@{}", target, self.config_domain())
        };
        let call_id = Uuid::new_v4().to_string();
        let media = self.media.new_session(&call_id, &options);
        let (events, receiver) = mpsc::unbounded_channel();
        let ended = Arc::new(AtomicBool::new(false));

        let dialog = Dialog {
            to_header: format!("<{}>", request_uri),
            request_uri,
            local_tag: random_token(),
            remote_tag: None,
            remote_target: None,
            cseq: 1,
            branch: branch(),
            state: DialogState::Calling,
            cancelled: false,
            auth_attempts: 0,
            media: media.clone(),
            events,
            ended: ended.clone(),
        };

        let invite = self.invite_for(&call_id, &dialog);
        info!("📞 INVITE {} ({})", dialog.request_uri, call_id);
        self.dialogs.insert(call_id.clone(), dialog);
        if let Err(reason) = self.send(sink, invite.to_string()).await {
            self.dialogs.remove(&call_id);
            return Err(ClientError::transport(&self.params.transport_url, reason));
        }

        Ok(PlacedCall {
            handle: Arc::new(WsCallHandle {
                call_id,
                media,
                commands: self.commands.clone(),
                ended,
            }),
            events: receiver,
        })
    }

    fn invite_for(&mut self, call_id: &str, dialog: &Dialog) -> SipRequest {
        let mut invite = self
            .base_request(
                "INVITE",
                &dialog.request_uri,
                &dialog.branch,
                &dialog.local_tag,
                &dialog.to_header,
                call_id,
                dialog.cseq,
            )
            .header("Contact", self.contact());
        if dialog.auth_attempts > 0 {
            if let Some((name, value)) = self.digest_header("INVITE", &dialog.request_uri) {
                invite = invite.header(name, value);
            }
        }
        invite.body("application/sdp", dialog.media.local_offer())
    }

    async fn on_invite_response(&mut self, sink: &mut WsSink, call_id: &str, response: SipResponse) -> Result<(), String> {
        let Some(mut dialog) = self.dialogs.remove(call_id) else {
            trace!("INVITE response for unknown call {}", call_id);
            return Ok(());
        };

        if response.is_provisional() {
            if response.status > 100 {
                dialog.state = DialogState::Early;
            }
            let _ = dialog.events.send(CallEvent::Progress { status: response.status });
            self.dialogs.insert(call_id.to_string(), dialog);
            return Ok(());
        }

        let to = response.headers.get("To").unwrap_or_default().to_string();
        dialog.remote_tag = tag_param(&to).map(str::to_string);
        dialog.to_header = to;

        if response.is_success() {
            dialog.remote_target = response.headers.get("Contact").map(|c| addr_uri(c).to_string());
            let ack = self.in_dialog_request("ACK", call_id, &dialog, dialog.cseq);
            self.send(sink, ack.to_string()).await?;

            if dialog.cancelled {
                debug!("Call {} answered after CANCEL, hanging up", call_id);
                dialog.cseq += 1;
                let bye = self.in_dialog_request("BYE", call_id, &dialog, dialog.cseq);
                self.send(sink, bye.to_string()).await?;
                finish(dialog, CallEvent::Ended { cause: "cancelled".into() });
                return Ok(());
            }

            if let Err(e) = dialog.media.apply_answer(&response.body) {
                warn!("Unusable answer for {}: {}", call_id, e);
            }
            dialog.state = DialogState::Confirmed;
            info!("Call {} confirmed", call_id);
            let _ = dialog.events.send(CallEvent::Confirmed);
            self.dialogs.insert(call_id.to_string(), dialog);
            return Ok(());
        }

        // Non-2xx finals are acknowledged in the INVITE transaction
        let ack = self.non_2xx_ack(call_id, &dialog);
        self.send(sink, ack.to_string()).await?;

        if matches!(response.status, 401 | 407) && !dialog.cancelled && dialog.auth_attempts < MAX_AUTH_ATTEMPTS {
            let header = if response.status == 407 { "Proxy-Authenticate" } else { "WWW-Authenticate" };
            if let Some(Ok(challenge)) = response.headers.get(header).map(DigestChallenge::parse) {
                self.registration.challenge = Some((challenge, response.status == 407));
                self.registration.nonce_count = 0;
                dialog.auth_attempts += 1;
                dialog.cseq += 1;
                dialog.branch = branch();
                dialog.to_header = format!("<{}>", dialog.request_uri);
                dialog.remote_tag = None;
                let invite = self.invite_for(call_id, &dialog);
                self.dialogs.insert(call_id.to_string(), dialog);
                return self.send(sink, invite.to_string()).await;
            }
        }

        let event = if dialog.cancelled || response.status == 487 {
            CallEvent::Ended { cause: "cancelled".into() }
        } else {
            CallEvent::Failed {
                cause: format!("{} {}", response.status, response.reason),
            }
        };
        finish(dialog, event);
        Ok(())
    }

    fn in_dialog_request(&self, method: &str, call_id: &str, dialog: &Dialog, cseq: u32) -> SipRequest {
        let uri = dialog.remote_target.clone().unwrap_or_else(|| dialog.request_uri.clone());
        self.base_request(method, &uri, &branch(), &dialog.local_tag, &dialog.to_header, call_id, cseq)
    }

    fn non_2xx_ack(&self, call_id: &str, dialog: &Dialog) -> SipRequest {
        self.base_request(
            "ACK",
            &dialog.request_uri,
            &dialog.branch,
            &dialog.local_tag,
            &dialog.to_header,
            call_id,
            dialog.cseq,
        )
    }

    async fn terminate(&mut self, sink: &mut WsSink, call_id: &str) -> Result<(), String> {
        let Some(mut dialog) = self.dialogs.remove(call_id) else {
            return Ok(());
        };
        match dialog.state {
            DialogState::Confirmed => {
                dialog.cseq += 1;
                let bye = self.in_dialog_request("BYE", call_id, &dialog, dialog.cseq);
                info!("Hanging up {}", call_id);
                let sent = self.send(sink, bye.to_string()).await;
                finish(dialog, CallEvent::Ended { cause: "local hangup".into() });
                sent
            }
            DialogState::Calling | DialogState::Early => {
                if dialog.cancelled {
                    self.dialogs.insert(call_id.to_string(), dialog);
                    return Ok(());
                }
                dialog.cancelled = true;
                let cancel = self.base_request(
                    "CANCEL",
                    &dialog.request_uri,
                    &dialog.branch,
                    &dialog.local_tag,
                    &format!("<{}>", dialog.request_uri),
                    call_id,
                    dialog.cseq,
                );
                info!("Cancelling {}", call_id);
                self.dialogs.insert(call_id.to_string(), dialog);
                self.send(sink, cancel.to_string()).await
            }
        }
    }

    async fn on_request(&mut self, sink: &mut WsSink, request: SipRequest) -> Result<(), String> {
        let call_id = request.headers.get("Call-ID").unwrap_or_default().to_string();
        debug!("SIP << {} from exchange ({})", request.method, call_id);

        let (status, reason) = match request.method.as_str() {
            "ACK" => return Ok(()),
            "BYE" => match self.dialogs.remove(&call_id) {
                Some(dialog) => {
                    info!("Exchange hung up {}", call_id);
                    finish(dialog, CallEvent::Ended { cause: "remote hangup".into() });
                    (200, "OK")
                }
                None => (481, "Call/Transaction Does Not Exist"),
            },
            "OPTIONS" => (200, "OK"),
            "INVITE" if self.dialogs.contains_key(&call_id) => (488, "Not Acceptable Here"),
            "INVITE" => (486, "Busy Here"),
            "CANCEL" => (481, "Call/Transaction Does Not Exist"),
            _ => (501, "Not Implemented"),
        };

        let response = SipResponse::to_request(&request, status, reason, &random_token())
            .header("User-Agent", self.user_agent.as_str());
        let response = if request.method == "OPTIONS" {
            response.header("Allow", "INVITE, ACK, CANCEL, BYE, OPTIONS")
        } else {
            response
        };
        self.send(sink, response.to_string()).await
    }

    async fn shutdown(&mut self, sink: &mut WsSink) {
        let call_ids: Vec<String> = self.dialogs.keys().cloned().collect();
        for call_id in call_ids {
            let _ = self.terminate(sink, &call_id).await;
        }
        for (_, dialog) in self.dialogs.drain() {
            finish(dialog, CallEvent::Ended { cause: "endpoint stopped".into() });
        }

        if self.registration.registered {
            debug!("Removing registration for {}", self.params.identity_uri);
            let _ = self.send_register(sink, 0).await;
        }
        let _ = sink.send(WsMessage::Close(None)).await;
        let _ = sink.close().await;
        info!("Endpoint for {} stopped", self.params.identity_uri);
    }

    fn on_transport_lost(&mut self, reason: String) {
        warn!("Signaling transport lost: {}", reason);
        self.registration.registered = false;
        self.registration.refresh_at = None;
        for (_, dialog) in self.dialogs.drain() {
            finish(dialog, CallEvent::Failed { cause: format!("transport lost: {}", reason) });
        }
        self.emit(EndpointEvent::Disconnected { reason: Some(reason) });
    }
}

/// Publish a terminal call event and release the dialog's media
fn finish(dialog: Dialog, event: CallEvent) {
    dialog.ended.store(true, Ordering::Release);
    dialog.media.close();
    let _ = dialog.events.send(event);
}

async fn connect(url: &str) -> Result<WsStream, String> {
    let mut request = url.into_client_request().map_err(|e| e.to_string())?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SIP_WS_SUBPROTOCOL));
    let (stream, _response) = connect_async(request).await.map_err(|e| e.to_string())?;
    Ok(stream)
}

async fn wait_for_shutdown(commands: &mut mpsc::UnboundedReceiver<Command>) {
    loop {
        match commands.recv().await {
            Some(Command::Shutdown) | None => return,
            Some(Command::PlaceCall { reply, .. }) => {
                let _ = reply.send(Err(ClientError::transport("", "endpoint is not connected yet")));
            }
            Some(Command::Terminate { .. }) => {}
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn granted_expires(response: &SipResponse) -> Option<u32> {
    response
        .headers
        .get_all("Contact")
        .find_map(|contact| header_param(contact, "expires").and_then(|e| e.parse().ok()))
        .or_else(|| response.headers.get("Expires").and_then(|e| e.trim().parse().ok()))
}

fn random_token() -> String {
    format!("{:x}", rand::random::<u64>())
}

fn branch() -> String {
    format!("z9hG4bK{}", random_token())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::RegistrationConfig;

    fn params(url: &str) -> EndpointParams {
        let config = RegistrationConfig::new("pbx.example.com", "9001", "pw");
        EndpointParams {
            transport_url: url.to_string(),
            identity_uri: config.identity_uri(),
            config,
        }
    }

    #[test]
    fn test_factory_rejects_non_ws_urls() {
        let factory = WsEndpointFactory::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(factory.create(params("https://pbx.example.com"), tx.clone()).is_err());
        assert!(factory.create(params("not a url"), tx.clone()).is_err());
        assert!(factory.create(params("wss://pbx.example.com:8089/ws"), tx).is_ok());
    }

    #[test]
    fn test_granted_expires_prefers_contact_param() {
        let response = SipResponse {
            status: 200,
            reason: "OK".into(),
            headers: Default::default(),
            body: String::new(),
        }
        .header("Contact", "<sip:9001@a.invalid;transport=ws>;expires=120")
        .header("Expires", "600");
        assert_eq!(granted_expires(&response), Some(120));

        let response = SipResponse {
            status: 200,
            reason: "OK".into(),
            headers: Default::default(),
            body: String::new(),
        }
        .header("Expires", "300");
        assert_eq!(granted_expires(&response), Some(300));
    }

    #[tokio::test]
    async fn test_unreachable_transport_reports_disconnect() {
        let factory = WsEndpointFactory::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut p = params("ws://127.0.0.1:1/ws");
        p.config.connection_timeout_ms = 2000;
        let endpoint = factory.create(p, tx).unwrap();
        endpoint.start().unwrap();

        match rx.recv().await {
            Some(EndpointEvent::Disconnected { reason }) => assert!(reason.is_some()),
            other => panic!("unexpected {:?}", other),
        }
        assert!(endpoint.place_call("*90205", CallOptions::audio_only(vec![])).await.is_err());
    }
}
