//! Per-connection orchestration of the configured forwarding strategy.
//!
//! Each connection walks a small state machine:
//! `AwaitingHandshake -> HandshakeParsed -> (StrategyApplied | Rejected)
//! -> Forwarded`. Decode failures surface the specific error and move the
//! connection to `Rejected`; the dispatcher never falls back to "no
//! forwarding" silently, since that would defeat the backend's trust
//! assumptions.
//!
//! The dispatcher holds no per-connection shared mutable state beyond the
//! immutable strategy, so connections are driven from independent tasks
//! without synchronization. Dropping an in-flight future aborts the
//! forwarding step; partially-sent plugin messages are never retried.

use crate::{
    config::ForwardingConfig,
    error::ForwardingError,
    identity::{ForwardingPayload, IdentityRecord, MonotonicTimestamp, ProfileProperty},
    protocol::{handshake::HandshakeIntent, Decoder},
    strategy::{ForwardingStrategy, PluginMessage},
};
use bytes::Bytes;
use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};
use tokio::time::timeout;
use uuid::Uuid;

/// How long the login-phase plugin-message round trip may take before the
/// connection is terminated with [`ForwardingError::ForwardingTimeout`].
const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

/// A login plugin request received from the backend during login.
#[derive(Debug, Clone)]
pub struct LoginPluginRequest {
    pub message_id: i32,
    pub channel: String,
    pub data: Bytes,
}

/// The proxy's answer to a [`LoginPluginRequest`].
#[derive(Debug, Clone)]
pub struct LoginPluginResponse {
    pub message_id: i32,
    pub successful: bool,
    pub data: Bytes,
}

/// Transport seam for the login-phase exchange with the backend.
///
/// Implemented by the surrounding proxy over its actual connection; tests
/// implement it in memory.
pub trait LoginExchange {
    async fn recv_plugin_request(&mut self) -> anyhow::Result<LoginPluginRequest>;

    async fn send_plugin_response(&mut self, response: LoginPluginResponse) -> anyhow::Result<()>;

    async fn send_plugin_message(&mut self, message: PluginMessage) -> anyhow::Result<()>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::AsRefStr)]
pub enum Phase {
    AwaitingHandshake,
    HandshakeParsed,
    StrategyApplied,
    Rejected,
    Forwarded,
}

/// Per-connection forwarding state. Created when a connection is
/// accepted, discarded once it is forwarded or rejected.
#[derive(Debug)]
pub struct ForwardingSession {
    peer: SocketAddr,
    phase: Phase,
}

impl ForwardingSession {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn transition(&mut self, next: Phase) {
        tracing::debug!(
            peer = %self.peer,
            from = self.phase.as_ref(),
            to = next.as_ref(),
            "forwarding transition"
        );
        self.phase = next;
    }
}

/// What [`ForwardingDispatcher::extract_forwarding`] yields on the
/// backend side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub record: IdentityRecord,
    /// For handshake-time variants, the handshake decoded from the same
    /// bytes; login-phase variants carry none.
    pub intent: Option<HandshakeIntent>,
}

/// Drives the configured strategy for every connection.
///
/// The strategy is selected once, at construction; per-connection calls
/// never re-evaluate the configuration.
#[derive(Debug)]
pub struct ForwardingDispatcher {
    strategy: ForwardingStrategy,
    clock: MonotonicTimestamp,
    exchange_timeout: Duration,
}

impl ForwardingDispatcher {
    /// Resolves the configuration and builds the dispatcher.
    ///
    /// A missing secret for a secret-bearing variant fails here, at
    /// startup, never per-connection.
    pub fn from_config(config: &ForwardingConfig) -> Result<Self, ForwardingError> {
        config.resolve().map(Self::new)
    }

    pub fn new(strategy: ForwardingStrategy) -> Self {
        Self {
            strategy,
            clock: MonotonicTimestamp::new(),
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
        }
    }

    pub fn with_exchange_timeout(mut self, exchange_timeout: Duration) -> Self {
        self.exchange_timeout = exchange_timeout;
        self
    }

    pub fn strategy(&self) -> &ForwardingStrategy {
        &self.strategy
    }

    /// Starts the state machine for a newly accepted connection.
    pub fn begin_connection(&self, peer: SocketAddr) -> ForwardingSession {
        ForwardingSession {
            peer,
            phase: Phase::AwaitingHandshake,
        }
    }

    /// Proxy side: consumes exactly one handshake packet and returns the
    /// bytes to send to the backend, with the strategy's address override
    /// applied where the variant calls for it.
    pub fn apply_forwarding(
        &self,
        session: &mut ForwardingSession,
        handshake_bytes: &[u8],
    ) -> Result<Vec<u8>, ForwardingError> {
        assert_eq!(
            session.phase,
            Phase::AwaitingHandshake,
            "apply_forwarding() accepts exactly one handshake per connection"
        );

        let intent = match HandshakeIntent::decode(&mut Decoder::new(handshake_bytes)) {
            Ok(intent) => intent,
            Err(e) => {
                session.transition(Phase::Rejected);
                tracing::warn!(peer = %session.peer, error = %e, "rejecting malformed handshake");
                return Err(e.into());
            }
        };
        session.transition(Phase::HandshakeParsed);

        let outgoing = self.strategy.apply_handshake(&intent, session.peer.ip());
        session.transition(Phase::StrategyApplied);
        Ok(outgoing)
    }

    /// Proxy side: assembles the identity record for a player whose login
    /// has been authenticated, stamped by the monotonic clock.
    pub fn build_payload(
        &self,
        session: &ForwardingSession,
        name: impl Into<String>,
        uuid: Uuid,
        properties: Vec<ProfileProperty>,
    ) -> ForwardingPayload {
        ForwardingPayload {
            name: name.into(),
            uuid,
            address: session.peer.ip(),
            properties,
            timestamp_ms: self.clock.now_ms(),
        }
    }

    /// Proxy side: answers a login plugin request. Requests on the
    /// strategy's forwarding channel get the signed identity payload;
    /// anything else is answered unsuccessfully so the backend can move
    /// on.
    pub fn answer_login_plugin_request(
        &self,
        request: &LoginPluginRequest,
        payload: &ForwardingPayload,
    ) -> Result<LoginPluginResponse, ForwardingError> {
        if self.strategy.login_channel() == Some(request.channel.as_str()) {
            let message = self
                .strategy
                .login_message(payload)?
                .expect("login-phase variants always produce a message");
            Ok(LoginPluginResponse {
                message_id: request.message_id,
                successful: true,
                data: message.data,
            })
        } else {
            Ok(LoginPluginResponse {
                message_id: request.message_id,
                successful: false,
                data: Bytes::new(),
            })
        }
    }

    /// Proxy side: drives the login-phase forwarding exchange to
    /// completion under the bounded timeout.
    ///
    /// Velocity-modern waits for the backend's plugin request and answers
    /// it; the BungeeCord family pushes its plugin message outright;
    /// handshake-time variants complete immediately. Exceeding the
    /// timeout terminates the connection with
    /// [`ForwardingError::ForwardingTimeout`] rather than hanging.
    pub async fn run_login_exchange<E: LoginExchange>(
        &self,
        session: &mut ForwardingSession,
        exchange: &mut E,
        payload: &ForwardingPayload,
    ) -> Result<(), ForwardingError> {
        assert_eq!(
            session.phase,
            Phase::StrategyApplied,
            "login exchange runs after the handshake has been forwarded"
        );

        let result = match timeout(self.exchange_timeout, self.drive_exchange(exchange, payload))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ForwardingError::ForwardingTimeout),
        };

        match result {
            Ok(()) => {
                session.transition(Phase::Forwarded);
                Ok(())
            }
            Err(e) => {
                session.transition(Phase::Rejected);
                tracing::warn!(peer = %session.peer, error = %e, "login forwarding failed");
                Err(e)
            }
        }
    }

    async fn drive_exchange<E: LoginExchange>(
        &self,
        exchange: &mut E,
        payload: &ForwardingPayload,
    ) -> Result<(), ForwardingError> {
        match &self.strategy {
            ForwardingStrategy::None | ForwardingStrategy::Meexprox => Ok(()),
            ForwardingStrategy::VelocityModern { .. } => loop {
                let request = exchange.recv_plugin_request().await?;
                let response = self.answer_login_plugin_request(&request, payload)?;
                let answered = response.successful;
                exchange.send_plugin_response(response).await?;
                if answered {
                    break Ok(());
                }
            },
            ForwardingStrategy::BungeecordSecret { .. } | ForwardingStrategy::Bungeeguard => {
                let message = self
                    .strategy
                    .login_message(payload)?
                    .expect("bungeecord variants always produce a message");
                exchange.send_plugin_message(message).await?;
                Ok(())
            }
        }
    }

    /// Backend side: extracts the forwarded identity from raw bytes.
    ///
    /// For handshake-time variants `raw_bytes` is the handshake packet
    /// body; for login-phase variants it is the plugin-message data. Any
    /// signature mismatch, stale payload or malformed field rejects the
    /// connection before further protocol state is entered.
    pub fn extract_forwarding(
        &self,
        raw_bytes: &[u8],
        observed_peer: IpAddr,
    ) -> Result<Extracted, ForwardingError> {
        let result = match self.strategy.login_channel() {
            None => self
                .strategy
                .extract_handshake(raw_bytes, observed_peer)
                .map_err(ForwardingError::from)
                .map(|(intent, address)| Extracted {
                    record: IdentityRecord {
                        name: None,
                        uuid: None,
                        address,
                        properties: Vec::new(),
                    },
                    intent: Some(intent),
                }),
            Some(_) => self
                .strategy
                .extract_login(raw_bytes, self.clock.now_ms())
                .map(|record| Extracted {
                    record,
                    intent: None,
                }),
        };

        if let Err(e) = &result {
            tracing::warn!(
                peer = %observed_peer,
                strategy = self.strategy.as_ref(),
                error = %e,
                "rejecting forwarded connection"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ForwardingConfig, ForwardingKind},
        protocol::{handshake::NextState, Encoder},
        signature::ForwardingSecret,
        strategy::VELOCITY_CHANNEL,
    };
    use std::collections::VecDeque;

    fn peer() -> SocketAddr {
        "203.0.113.5:50000".parse().unwrap()
    }

    fn handshake_bytes() -> Vec<u8> {
        let intent =
            HandshakeIntent::new(765, "play.example.org", 25565, NextState::Login).unwrap();
        let mut buf = Vec::new();
        intent.encode(&mut Encoder::new(&mut buf));
        buf
    }

    fn velocity_config(secret: &str) -> ForwardingConfig {
        ForwardingConfig {
            enabled: true,
            kind: ForwardingKind::Velocity,
            secret: Some(secret.to_owned()),
            freshness_window_secs: 30,
        }
    }

    /// In-memory transport: scripted requests in, responses out.
    #[derive(Default)]
    struct MockExchange {
        requests: VecDeque<LoginPluginRequest>,
        responses: Vec<LoginPluginResponse>,
        messages: Vec<PluginMessage>,
    }

    impl LoginExchange for MockExchange {
        async fn recv_plugin_request(&mut self) -> anyhow::Result<LoginPluginRequest> {
            match self.requests.pop_front() {
                Some(request) => Ok(request),
                None => std::future::pending().await,
            }
        }

        async fn send_plugin_response(
            &mut self,
            response: LoginPluginResponse,
        ) -> anyhow::Result<()> {
            self.responses.push(response);
            Ok(())
        }

        async fn send_plugin_message(&mut self, message: PluginMessage) -> anyhow::Result<()> {
            self.messages.push(message);
            Ok(())
        }
    }

    #[test]
    fn malformed_handshake_moves_to_rejected() {
        let dispatcher = ForwardingDispatcher::new(ForwardingStrategy::None);
        let mut session = dispatcher.begin_connection(peer());

        let err = dispatcher
            .apply_forwarding(&mut session, &handshake_bytes()[..3])
            .unwrap_err();
        assert!(matches!(err, ForwardingError::Decode(_)));
        assert_eq!(session.phase(), Phase::Rejected);
    }

    #[test]
    fn meexprox_apply_extract_round_trip() {
        let dispatcher = ForwardingDispatcher::new(ForwardingStrategy::Meexprox);
        let mut session = dispatcher.begin_connection(peer());

        let outgoing = dispatcher
            .apply_forwarding(&mut session, &handshake_bytes())
            .unwrap();
        assert_eq!(session.phase(), Phase::StrategyApplied);

        let backend = ForwardingDispatcher::new(ForwardingStrategy::Meexprox);
        let extracted = backend
            .extract_forwarding(&outgoing, "10.0.0.1".parse().unwrap())
            .unwrap();
        assert_eq!(extracted.record.address, peer().ip());
        assert_eq!(
            extracted.intent.unwrap().server_address(),
            "play.example.org"
        );
    }

    #[tokio::test]
    async fn velocity_exchange_end_to_end() {
        let dispatcher = ForwardingDispatcher::from_config(&velocity_config("s3cret")).unwrap();
        let mut session = dispatcher.begin_connection(peer());
        dispatcher
            .apply_forwarding(&mut session, &handshake_bytes())
            .unwrap();

        let payload = dispatcher.build_payload(
            &session,
            "Alice",
            Uuid::from_u128(0x11111111_1111_1111_1111_111111111111),
            Vec::new(),
        );

        let mut exchange = MockExchange::default();
        exchange.requests.push_back(LoginPluginRequest {
            message_id: 7,
            channel: VELOCITY_CHANNEL.to_owned(),
            data: Bytes::new(),
        });

        dispatcher
            .run_login_exchange(&mut session, &mut exchange, &payload)
            .await
            .unwrap();
        assert_eq!(session.phase(), Phase::Forwarded);

        let response = &exchange.responses[0];
        assert_eq!(response.message_id, 7);
        assert!(response.successful);

        // Backend with the same secret accepts the record...
        let backend = ForwardingDispatcher::from_config(&velocity_config("s3cret")).unwrap();
        let extracted = backend
            .extract_forwarding(&response.data, "10.0.0.1".parse().unwrap())
            .unwrap();
        assert_eq!(extracted.record.name.as_deref(), Some("Alice"));
        assert_eq!(extracted.record.address, peer().ip());

        // ...and a backend with the wrong secret rejects it.
        let wrong = ForwardingDispatcher::from_config(&velocity_config("wrong")).unwrap();
        assert!(matches!(
            wrong.extract_forwarding(&response.data, "10.0.0.1".parse().unwrap()),
            Err(ForwardingError::SignatureMismatch)
        ));
    }

    #[tokio::test]
    async fn unrelated_plugin_request_answered_unsuccessfully() {
        let dispatcher = ForwardingDispatcher::from_config(&velocity_config("s3cret")).unwrap();
        let mut session = dispatcher.begin_connection(peer());
        dispatcher
            .apply_forwarding(&mut session, &handshake_bytes())
            .unwrap();

        let payload = dispatcher.build_payload(&session, "Alice", Uuid::new_v4(), Vec::new());

        let mut exchange = MockExchange::default();
        exchange.requests.push_back(LoginPluginRequest {
            message_id: 1,
            channel: "somemod:handshake".to_owned(),
            data: Bytes::new(),
        });
        exchange.requests.push_back(LoginPluginRequest {
            message_id: 2,
            channel: VELOCITY_CHANNEL.to_owned(),
            data: Bytes::new(),
        });

        dispatcher
            .run_login_exchange(&mut session, &mut exchange, &payload)
            .await
            .unwrap();

        assert!(!exchange.responses[0].successful);
        assert!(exchange.responses[1].successful);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_exchange_times_out() {
        let dispatcher = ForwardingDispatcher::from_config(&velocity_config("s3cret")).unwrap();
        let mut session = dispatcher.begin_connection(peer());
        dispatcher
            .apply_forwarding(&mut session, &handshake_bytes())
            .unwrap();

        let payload = dispatcher.build_payload(&session, "Alice", Uuid::new_v4(), Vec::new());

        // No scripted request: recv_plugin_request never resolves.
        let mut exchange = MockExchange::default();
        let err = dispatcher
            .run_login_exchange(&mut session, &mut exchange, &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardingError::ForwardingTimeout));
        assert_eq!(session.phase(), Phase::Rejected);
    }

    #[tokio::test]
    async fn bungee_exchange_pushes_message() {
        let dispatcher = ForwardingDispatcher::new(ForwardingStrategy::BungeecordSecret {
            secret: ForwardingSecret::from("s3cret"),
        });
        let mut session = dispatcher.begin_connection(peer());
        dispatcher
            .apply_forwarding(&mut session, &handshake_bytes())
            .unwrap();

        let payload = dispatcher.build_payload(&session, "Alice", Uuid::new_v4(), Vec::new());

        let mut exchange = MockExchange::default();
        dispatcher
            .run_login_exchange(&mut session, &mut exchange, &payload)
            .await
            .unwrap();
        assert_eq!(exchange.messages.len(), 1);
        assert_eq!(session.phase(), Phase::Forwarded);
    }
}
