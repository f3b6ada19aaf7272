//! The registration controller
//!
//! [`RegistrationController`] is the only component that constructs or tears
//! down a [`SignalingEndpoint`]. Endpoint events are applied through the
//! [`RegistrationState`] transition table in the order the endpoint emitted
//! them, and every applied transition is published on the event bus.
//!
//! Each endpoint is tagged with a generation number. Teardown bumps the
//! generation, so events still queued from an old endpoint (or a fallback
//! timer that lost a race) are discarded instead of being applied to the new
//! one.

use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{RegistrationConfig, RegistrationState, RegistrationTrigger};
use crate::config::IceServer;
use crate::endpoint::{CallOptions, EndpointEvent, EndpointFactory, EndpointParams, PlacedCall, SignalingEndpoint};
use crate::error::{ClientError, ClientResult, DialError};
use crate::events::{ClientEvent, EventEmitter, RegistrationStatusInfo};
use crate::transport::{TransportAddress, TransportResolver};

struct Inner {
    state: RegistrationState,
    generation: u64,
    config: Option<RegistrationConfig>,
    endpoint: Option<Arc<dyn SignalingEndpoint>>,
    pump: Option<JoinHandle<()>>,
    fallback_timer: Option<JoinHandle<()>>,
    fallback_attempted: bool,
    transport_url: Option<String>,
}

struct Shared {
    factory: Arc<dyn EndpointFactory>,
    events: EventEmitter,
    inner: Mutex<Inner>,
}

/// Owns the signaling endpoint and its registration state
///
/// All methods are synchronous except [`place_call`](Self::place_call);
/// `start` spawns the event pump and fallback timer, so it must run inside a
/// Tokio runtime.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use switchboard_client_core::events::EventEmitter;
/// use switchboard_client_core::registration::{RegistrationConfig, RegistrationController};
/// use switchboard_client_core::sip::WsEndpointFactory;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let controller = RegistrationController::new(Arc::new(WsEndpointFactory::default()), EventEmitter::default());
/// controller.start(RegistrationConfig::new("pbx.example.com", "9001", "s3cret"))?;
/// let mut events = controller.subscribe();
/// while let Ok(event) = events.recv().await {
///     println!("{:?}", event);
/// }
/// # Ok(())
/// # }
/// ```
pub struct RegistrationController {
    shared: Arc<Shared>,
}

impl RegistrationController {
    /// Create a controller that builds endpoints with `factory`
    pub fn new(factory: Arc<dyn EndpointFactory>, events: EventEmitter) -> Self {
        Self {
            shared: Arc::new(Shared {
                factory,
                events,
                inner: Mutex::new(Inner {
                    state: RegistrationState::Idle,
                    generation: 0,
                    config: None,
                    endpoint: None,
                    pump: None,
                    fallback_timer: None,
                    fallback_attempted: false,
                    transport_url: None,
                }),
            }),
        }
    }

    /// Start (or restart) registration with `config`
    ///
    /// An invalid config is rejected with a configuration error before
    /// anything is torn down or attempted. The same config while an attempt
    /// is in flight or registered is a no-op; any other call tears the
    /// current endpoint down and registers from scratch, with a fresh
    /// fallback allowance.
    pub fn start(&self, config: RegistrationConfig) -> ClientResult<()> {
        if let Err(e) = config.validate() {
            warn!("Not starting registration: {}", e);
            return Err(e);
        }

        let mut inner = self.shared.inner.lock();
        if inner.state.is_active() && inner.config.as_ref() == Some(&config) {
            debug!("Registration for {} already in progress", config.identity_uri());
            return Ok(());
        }

        if inner.endpoint.is_some() {
            info!("Configuration changed, rebuilding signaling endpoint");
        }
        self.shared.teardown_locked(&mut inner);

        let primary = TransportResolver::primary(&config);
        inner.config = Some(config);
        inner.fallback_attempted = false;
        Shared::connect_locked(&self.shared, &mut inner, primary);
        Ok(())
    }

    /// Unregister, disconnect and return to `idle`
    ///
    /// Safe in any state, including `idle`, and safe to repeat.
    pub fn stop(&self) {
        let mut inner = self.shared.inner.lock();
        self.shared.teardown_locked(&mut inner);
        inner.config = None;
        inner.fallback_attempted = false;
        self.shared.apply_locked(&mut inner, RegistrationTrigger::Stopped, None);
    }

    /// Current registration state
    pub fn status(&self) -> RegistrationState {
        self.shared.inner.lock().state
    }

    /// Subscribe to the client event bus this controller publishes on
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// The event bus this controller publishes on
    pub fn events(&self) -> &EventEmitter {
        &self.shared.events
    }

    /// Exchange domain of the active configuration
    pub fn domain(&self) -> Option<String> {
        self.shared
            .inner
            .lock()
            .config
            .as_ref()
            .map(|c| c.domain.trim().to_string())
            .filter(|d| !d.is_empty())
    }

    /// ICE servers of the active configuration
    pub fn ice_servers(&self) -> Vec<IceServer> {
        self.shared
            .inner
            .lock()
            .config
            .as_ref()
            .map(|c| c.ice_servers.clone())
            .unwrap_or_default()
    }

    /// Transport URL of the current endpoint
    pub fn transport_url(&self) -> Option<String> {
        self.shared.inner.lock().transport_url.clone()
    }

    /// Whether the same-origin fallback has been used for the current `start`
    pub fn fallback_attempted(&self) -> bool {
        self.shared.inner.lock().fallback_attempted
    }

    /// Place a call through the registered endpoint
    ///
    /// Refused with [`DialError::NotRegistered`] unless the state is
    /// `registered`.
    pub async fn place_call(&self, target: &str, options: CallOptions) -> ClientResult<PlacedCall> {
        let endpoint = {
            let inner = self.shared.inner.lock();
            if !inner.state.can_place_calls() {
                return Err(DialError::NotRegistered {
                    state: inner.state.to_string(),
                }
                .into());
            }
            inner
                .endpoint
                .clone()
                .ok_or_else(|| ClientError::internal("registered without an endpoint"))?
        };
        endpoint.place_call(target, options).await
    }
}

impl Drop for RegistrationController {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn connect_locked(this: &Arc<Self>, inner: &mut Inner, address: TransportAddress) {
        let Some(config) = inner.config.clone() else {
            return;
        };

        inner.generation += 1;
        let generation = inner.generation;
        inner.transport_url = Some(address.url.clone());

        info!("📡 Connecting {} via {}", config.identity_uri(), address);
        this.events.emit(ClientEvent::TransportSelected {
            url: address.url.clone(),
            fallback: address.is_fallback(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let params = EndpointParams {
            transport_url: address.url.clone(),
            identity_uri: config.identity_uri(),
            config: config.clone(),
        };

        let endpoint = match this.factory.create(params, tx) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!("Could not construct endpoint for {}: {}", address.url, e);
                this.apply_locked(inner, RegistrationTrigger::TransportFailed, Some(e.to_string()));
                Shared::fallback_locked(this, inner);
                return;
            }
        };

        this.apply_locked(inner, RegistrationTrigger::ConnectIssued, None);
        inner.endpoint = Some(endpoint.clone());
        inner.pump = Some(tokio::spawn(pump_endpoint_events(
            Arc::downgrade(this),
            generation,
            rx,
        )));

        if let Err(e) = endpoint.start() {
            warn!("Endpoint for {} failed to start: {}", address.url, e);
            this.apply_locked(inner, RegistrationTrigger::TransportFailed, Some(e.to_string()));
            Shared::fallback_locked(this, inner);
            return;
        }

        if !inner.fallback_attempted {
            let timeout = config.connection_timeout();
            let weak = Arc::downgrade(this);
            inner.fallback_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(shared) = weak.upgrade() {
                    Shared::on_fallback_timer(&shared, generation);
                }
            }));
        }
    }

    fn fallback_locked(this: &Arc<Self>, inner: &mut Inner) {
        if inner.fallback_attempted {
            debug!("Fallback transport already used for this registration");
            return;
        }
        inner.fallback_attempted = true;

        let Some(config) = inner.config.clone() else {
            return;
        };
        match TransportResolver::fallback(&config) {
            Some(address) => {
                info!("🔁 Retrying registration through same-origin transport");
                this.teardown_locked(inner);
                Shared::connect_locked(this, inner, address);
            }
            None => {
                warn!("No local origin configured; no fallback transport available");
            }
        }
    }

    fn on_fallback_timer(this: &Arc<Self>, generation: u64) {
        let mut inner = this.inner.lock();
        if inner.generation != generation {
            trace!("Stale fallback timer for generation {}", generation);
            return;
        }
        inner.fallback_timer = None;
        // Failed here means a rejection or an already spent fallback
        if matches!(inner.state, RegistrationState::Registered | RegistrationState::Failed) {
            return;
        }
        warn!("Not registered within the connection timeout (state {})", inner.state);
        Shared::fallback_locked(this, &mut inner);
    }

    fn on_endpoint_event(this: &Arc<Self>, generation: u64, event: EndpointEvent) {
        let mut inner = this.inner.lock();
        if inner.generation != generation {
            trace!("Discarding {:?} from a torn-down endpoint", event);
            return;
        }

        debug!("Endpoint event: {:?}", event);
        let (trigger, reason) = match event {
            EndpointEvent::Connecting => (RegistrationTrigger::ConnectIssued, None),
            EndpointEvent::Connected => (RegistrationTrigger::TransportConnected, None),
            EndpointEvent::Disconnected { reason } => (RegistrationTrigger::TransportLost, reason),
            EndpointEvent::Registered => (RegistrationTrigger::Registered, None),
            EndpointEvent::Unregistered { cause } => (RegistrationTrigger::Unregistered, cause),
            EndpointEvent::RegistrationFailed { cause } => {
                (RegistrationTrigger::RegistrationFailed, Some(cause))
            }
        };

        let previous = inner.state;
        this.apply_locked(&mut inner, trigger, reason);

        match trigger {
            RegistrationTrigger::Registered if inner.state == RegistrationState::Registered => {
                if let Some(timer) = inner.fallback_timer.take() {
                    timer.abort();
                }
            }
            RegistrationTrigger::RegistrationFailed => {
                // Rejected by the exchange; stays failed until the next start
                if let Some(timer) = inner.fallback_timer.take() {
                    timer.abort();
                }
            }
            RegistrationTrigger::TransportLost
                if matches!(previous, RegistrationState::Connecting | RegistrationState::Connected) =>
            {
                // Take our own handle so a fallback teardown does not abort this task
                let own_pump = inner.pump.take();
                let before = inner.generation;
                Shared::fallback_locked(this, &mut inner);
                if inner.generation == before {
                    inner.pump = own_pump;
                }
            }
            _ => {}
        }
    }

    fn apply_locked(&self, inner: &mut Inner, trigger: RegistrationTrigger, reason: Option<String>) {
        let previous = inner.state;
        let Some(next) = previous.on(trigger) else {
            trace!("Ignoring {:?} while {}", trigger, previous);
            return;
        };
        if next == previous {
            return;
        }

        inner.state = next;
        match &reason {
            Some(reason) => info!("Registration {} -> {} ({})", previous, next, reason),
            None => info!("Registration {} -> {}", previous, next),
        }
        self.events.emit(ClientEvent::RegistrationStateChanged(RegistrationStatusInfo {
            previous,
            state: next,
            reason,
            transport_url: inner.transport_url.clone(),
            timestamp: Utc::now(),
        }));
    }

    fn teardown_locked(&self, inner: &mut Inner) {
        inner.generation += 1;
        if let Some(timer) = inner.fallback_timer.take() {
            timer.abort();
        }
        if let Some(pump) = inner.pump.take() {
            pump.abort();
        }
        if let Some(endpoint) = inner.endpoint.take() {
            debug!("Stopping signaling endpoint");
            endpoint.stop();
        }
        inner.transport_url = None;
    }
}

async fn pump_endpoint_events(
    shared: Weak<Shared>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<EndpointEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        Shared::on_endpoint_event(&shared, generation, event);
    }
    trace!("Endpoint event pump for generation {} finished", generation);
}
