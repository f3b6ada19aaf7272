//! Subcommand implementations

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use colored::Colorize;
use switchboard_client_core::media::AudioOutput;
use switchboard_client_core::supervisor::OutputFactory;
use switchboard_client_core::{
    BackendClient, ClientEvent, EventEmitter, LiveCall, LiveCallFeed, RegistrationController, RegistrationState,
    SessionState, SupervisoryAction, SupervisoryCallManager, WsEndpointFactory,
};
use tokio::signal::ctrl_c;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::ConsoleConfig;
use crate::output::{action_label, calls_table, TerminalOutput};

/// Grace period for the un-REGISTER to leave before the runtime shuts down
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

fn build_feed(config: &ConsoleConfig, events: EventEmitter) -> Result<(Arc<BackendClient>, Arc<LiveCallFeed>)> {
    let backend = Arc::new(BackendClient::new(config.backend.clone())?);
    let feed = Arc::new(LiveCallFeed::new(backend.clone(), events));
    Ok((backend, feed))
}

/// `calls`
pub async fn calls(config: &ConsoleConfig, json: bool) -> Result<()> {
    let (backend, feed) = build_feed(config, EventEmitter::default())?;
    feed.refresh(backend.as_ref())
        .await
        .context("Failed to load live calls")?;

    let calls = feed.live_calls();
    if json {
        println!("{}", serde_json::to_string_pretty(calls.as_ref())?);
    } else {
        println!("{}", calls_table(&calls));
    }
    Ok(())
}

/// `watch`
pub async fn watch(config: &ConsoleConfig, interval_ms: Option<u64>) -> Result<()> {
    let events = EventEmitter::default();
    let mut rx = events.subscribe();
    let (backend, feed) = build_feed(config, events)?;
    let interval = interval_ms
        .map(|ms| Duration::from_millis(ms.max(1)))
        .unwrap_or_else(|| config.feed.poll_interval());

    let handle = feed.start(interval, backend);
    println!("{}", format!("Polling live calls every {:?}; Ctrl-C to stop", interval).dimmed());

    loop {
        tokio::select! {
            _ = ctrl_c() => break,
            event = rx.recv() => match event {
                Ok(ClientEvent::LiveCallsUpdated { live_calls, fetched_at, .. }) => {
                    println!("\n{} {}", "Live calls at".bold(), fetched_at.format("%H:%M:%S"));
                    println!("{}", calls_table(&live_calls));
                }
                Ok(ClientEvent::LiveCallPollFailed { error }) => {
                    eprintln!("{} {}", "poll failed:".yellow(), error);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => debug!("Skipped {} feed events", skipped),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    handle.cancel();
    Ok(())
}

/// `register`
pub async fn register(config: &ConsoleConfig) -> Result<()> {
    let registration = RegistrationController::new(Arc::new(WsEndpointFactory::default()), EventEmitter::default());
    let mut rx = registration.subscribe();
    registration.start(config.registration.clone())?;
    println!("{}", format!("Registering {}; Ctrl-C to stop", config.registration.identity_uri()).dimmed());

    loop {
        tokio::select! {
            _ = ctrl_c() => break,
            event = rx.recv() => match event {
                Ok(ClientEvent::RegistrationStateChanged(info)) => {
                    let state = state_label(info.state);
                    match info.reason {
                        Some(reason) => println!("{} -> {} ({})", info.previous, state, reason),
                        None => println!("{} -> {}", info.previous, state),
                    }
                }
                Ok(ClientEvent::TransportSelected { url, fallback }) => {
                    let kind = if fallback { "fallback" } else { "primary" };
                    println!("{} {} ({})", "transport".dimmed(), url, kind);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    registration.stop();
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    Ok(())
}

/// `monitor`, `whisper`, `barge`
pub async fn supervise(config: &ConsoleConfig, action: SupervisoryAction, channel: &str) -> Result<()> {
    let events = EventEmitter::default();
    let (backend, feed) = build_feed(config, events.clone())?;
    feed.refresh(backend.as_ref())
        .await
        .context("Failed to load live calls")?;
    let call = feed
        .find(channel)
        .ok_or_else(|| anyhow!("No live call with channel '{}'", channel))?;

    let registration = Arc::new(RegistrationController::new(Arc::new(WsEndpointFactory::default()), events));
    let mut rx = registration.subscribe();
    registration.start(config.registration.clone())?;
    wait_until_registered(&registration, &mut rx, config).await?;

    let outputs: OutputFactory =
        Arc::new(|action: SupervisoryAction| -> Arc<dyn AudioOutput> { Arc::new(TerminalOutput::new(action)) });
    let manager = SupervisoryCallManager::new(registration.clone(), outputs).with_policy(config.duplicate_policy);

    let result = run_session(&manager, &mut rx, action, &call).await;

    manager.terminate_all();
    registration.stop();
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    result
}

async fn run_session(
    manager: &SupervisoryCallManager,
    rx: &mut broadcast::Receiver<ClientEvent>,
    action: SupervisoryAction,
    call: &LiveCall,
) -> Result<()> {
    let session = manager.invoke(action, call).await?;
    println!(
        "{} {} on {} (agent {}); Ctrl-C to hang up",
        action_label(action),
        session.target(),
        call.channel,
        session.extension()
    );

    loop {
        tokio::select! {
            _ = ctrl_c() => {
                info!("Hanging up on operator request");
                manager.terminate(action);
                return Ok(());
            }
            event = rx.recv() => match event {
                Ok(ClientEvent::SessionStateChanged(info)) if info.session_id == session.id() => {
                    let reason = info.reason.map(|r| format!(" ({})", r)).unwrap_or_default();
                    println!("{} {}{}", action_label(action), info.state, reason);
                    match info.state {
                        SessionState::Ended => return Ok(()),
                        SessionState::Failed => bail!("{} session failed", action),
                        _ => {}
                    }
                }
                Ok(ClientEvent::RegistrationStateChanged(info)) if !info.state.can_place_calls() => {
                    eprintln!("{} registration is now {}", "warning:".yellow(), info.state);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }
}

async fn wait_until_registered(
    registration: &RegistrationController,
    rx: &mut broadcast::Receiver<ClientEvent>,
    config: &ConsoleConfig,
) -> Result<()> {
    // Primary attempt, fallback attempt, and slack for the exchange to answer
    let deadline = config.registration.connection_timeout() * 3;
    let wait = async {
        loop {
            if registration.status() == RegistrationState::Registered {
                return Ok(());
            }
            match rx.recv().await {
                Ok(ClientEvent::RegistrationStateChanged(info)) => match info.state {
                    RegistrationState::Registered => return Ok(()),
                    // Still failed once the event arrives: rejected, or no fallback left to try
                    RegistrationState::Failed if registration.status() == RegistrationState::Failed => {
                        return Err(anyhow!(
                            "Registration failed: {}",
                            info.reason.unwrap_or_else(|| "no reason given".into())
                        ));
                    }
                    _ => {}
                },
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Err(anyhow!("Event bus closed")),
            }
        }
    };
    tokio::time::timeout(deadline, wait)
        .await
        .map_err(|_| anyhow!("Not registered within {:?} (state {})", deadline, registration.status()))?
}

fn state_label(state: RegistrationState) -> String {
    match state {
        RegistrationState::Registered => state.to_string().green().bold().to_string(),
        RegistrationState::Failed | RegistrationState::Unregistered => state.to_string().red().to_string(),
        _ => state.to_string().yellow().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use switchboard_client_core::endpoint::{EndpointEventSender, EndpointParams};
    use switchboard_client_core::{
        CallOptions, ClientResult, EndpointEvent, EndpointFactory, LocalOrigin, PlacedCall, RegistrationConfig,
        SignalingEndpoint,
    };

    /// Connects, then the registrar answers 403
    struct RejectingFactory;

    struct RejectingEndpoint {
        events: EndpointEventSender,
    }

    impl EndpointFactory for RejectingFactory {
        fn create(&self, _params: EndpointParams, events: EndpointEventSender) -> ClientResult<Arc<dyn SignalingEndpoint>> {
            Ok(Arc::new(RejectingEndpoint { events }))
        }
    }

    #[async_trait]
    impl SignalingEndpoint for RejectingEndpoint {
        fn start(&self) -> ClientResult<()> {
            let _ = self.events.send(EndpointEvent::Connected);
            let _ = self.events.send(EndpointEvent::RegistrationFailed {
                cause: "403 Forbidden".into(),
            });
            Ok(())
        }

        fn stop(&self) {}

        async fn place_call(&self, _target: &str, _options: CallOptions) -> ClientResult<PlacedCall> {
            unreachable!("never registered")
        }
    }

    async fn rejected_wait(registration: RegistrationConfig) -> Result<()> {
        let config = ConsoleConfig {
            registration: registration.with_connection_timeout_ms(60_000),
            ..Default::default()
        };
        let controller = RegistrationController::new(Arc::new(RejectingFactory), EventEmitter::default());
        let mut rx = controller.subscribe();
        controller.start(config.registration.clone())?;
        let result = tokio::time::timeout(Duration::from_secs(2), wait_until_registered(&controller, &mut rx, &config))
            .await
            .expect("rejection reported before the registration deadline");
        controller.stop();
        result
    }

    #[tokio::test]
    async fn test_rejection_without_origin_fails_fast_with_reason() {
        let err = rejected_wait(RegistrationConfig::new("pbx.example.com", "9001", "s3cret"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("403 Forbidden"), "{}", err);
    }

    #[tokio::test]
    async fn test_rejection_is_final_even_with_unused_fallback() {
        let registration = RegistrationConfig::new("pbx.example.com", "9001", "s3cret")
            .with_origin(LocalOrigin::new("console.example.com", true));
        let err = rejected_wait(registration).await.unwrap_err();
        assert!(err.to_string().contains("403 Forbidden"), "{}", err);
    }
}
