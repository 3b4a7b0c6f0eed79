//! Per-connection WebSocket handler.
//!
//! Keeps WebSocket framing and heartbeats at the edge while deferring
//! application behaviour to the injected domain services. The public
//! WebSocket contract pings every 5s and considers a connection idle
//! after 10s without client traffic. Tests shorten these intervals to
//! speed up feedback; adjust the constants below if SLAs change so
//! clients and intermediaries stay aligned.

use std::time::{Duration, Instant};

use actix_ws::{CloseCode, CloseReason, Closed, Message, MessageStream, ProtocolError, Session};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time;
use tracing::{info, warn};

use crate::domain::{
    ActorId, ActorKind, Coordinates, DriverDetails, LocationSample, OutboundEvent, RideId,
    RidePartyNotice,
};
use crate::ws::messages::{
    ClientMessage, JoinRequest, LocationUpdateRequest, RejoinRideRequest, ToggleOnlineRequest,
};
use crate::ws::state::WsState;

/// Time between heartbeats to the client (5s in production, shorter in tests).
#[cfg(not(test))]
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
#[cfg(test)]
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(50);

/// Max idle time before disconnecting the client (10s in production, shorter in tests).
#[cfg(not(test))]
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);
#[cfg(test)]
const CLIENT_TIMEOUT: Duration = Duration::from_millis(100);

pub(super) async fn handle_ws_session(state: WsState, session: Session, stream: MessageStream) {
    WsSession::new(state).run(session, stream).await;
}

enum SessionError {
    ClientClosed(Option<CloseReason>),
    StreamClosed,
    HeartbeatTimeout,
    Protocol(ProtocolError),
    InvalidPayload(&'static str),
    Superseded,
    Network(Closed),
}

enum CloseAction {
    None,
    Close(Option<CloseReason>),
}

/// Who this session authenticated as via its join frame.
struct Identity {
    actor: ActorId,
    kind: ActorKind,
}

struct WsSession {
    state: WsState,
    identity: Option<Identity>,
    /// Receiver minted by a join frame, pending pickup by the run loop.
    pending_outbound: Option<UnboundedReceiver<OutboundEvent>>,
}

impl WsSession {
    fn new(state: WsState) -> Self {
        Self {
            state,
            identity: None,
            pending_outbound: None,
        }
    }

    async fn run(&mut self, mut session: Session, mut stream: MessageStream) {
        let mut last_heartbeat = Instant::now();
        let mut heartbeat = time::interval(HEARTBEAT_INTERVAL);
        // The outbound receiver lives outside `self` so the select arms
        // below borrow disjoint state.
        let mut outbound: Option<UnboundedReceiver<OutboundEvent>> = None;

        loop {
            if let Some(rx) = self.pending_outbound.take() {
                outbound = Some(rx);
            }

            let result = tokio::select! {
                _ = heartbeat.tick() => {
                    self.handle_heartbeat_tick(&mut session, &last_heartbeat).await
                }
                message = stream.recv() => {
                    self.handle_stream_message(&mut session, &mut last_heartbeat, message)
                        .await
                }
                event = recv_outbound(&mut outbound) => {
                    match event {
                        Some(event) => send_json(&mut session, &event)
                            .await
                            .map_err(SessionError::Network),
                        // A later join replaced this session's channel.
                        None => Err(SessionError::Superseded),
                    }
                }
            };

            if let Err(error) = result {
                self.log_shutdown_reason(&error);
                let superseded = matches!(error, SessionError::Superseded);
                let close_action = Self::close_action_for(&error);
                Self::close_session_if_needed(session, close_action).await;
                self.teardown_presence(superseded);
                return;
            }
        }
    }

    async fn handle_heartbeat_tick(
        &self,
        session: &mut Session,
        last_heartbeat: &Instant,
    ) -> Result<(), SessionError> {
        if Instant::now().duration_since(*last_heartbeat) > CLIENT_TIMEOUT {
            return Err(SessionError::HeartbeatTimeout);
        }

        session.ping(b"").await.map_err(SessionError::Network)
    }

    async fn handle_stream_message(
        &mut self,
        session: &mut Session,
        last_heartbeat: &mut Instant,
        message: Option<Result<Message, ProtocolError>>,
    ) -> Result<(), SessionError> {
        let Some(message) = message else {
            return Err(SessionError::StreamClosed);
        };

        match message {
            Ok(message) => self.handle_message(session, last_heartbeat, message).await,
            Err(error) => Err(SessionError::Protocol(error)),
        }
    }

    async fn handle_message(
        &mut self,
        session: &mut Session,
        last_heartbeat: &mut Instant,
        message: Message,
    ) -> Result<(), SessionError> {
        match message {
            Message::Ping(payload) => {
                *last_heartbeat = Instant::now();
                self.touch_presence();
                session
                    .pong(&payload)
                    .await
                    .map_err(SessionError::Network)?;
                Ok(())
            }
            Message::Text(text) => {
                *last_heartbeat = Instant::now();
                self.touch_presence();
                self.handle_text_message(session, text.as_ref()).await
            }
            Message::Pong(_) | Message::Binary(_) | Message::Continuation(_) | Message::Nop => {
                *last_heartbeat = Instant::now();
                Ok(())
            }
            Message::Close(reason) => Err(SessionError::ClientClosed(reason)),
        }
    }

    async fn handle_text_message(
        &mut self,
        session: &mut Session,
        text: &str,
    ) -> Result<(), SessionError> {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(error) => {
                warn!(error = %error, "Rejected malformed WebSocket payload");
                return Err(SessionError::InvalidPayload("invalid payload"));
            }
        };

        match message {
            ClientMessage::Join(request) => self.handle_join(request).await,
            ClientMessage::ToggleOnline(request) => self.handle_toggle_online(request).await,
            ClientMessage::LocationUpdate(request) => self.handle_location_update(request).await,
            ClientMessage::RejoinRide(request) => self.handle_rejoin(session, request).await,
        }
    }

    /// Register presence and open this session's outbound channel. A
    /// driver joining available with a position is immediately matched
    /// against still-fresh pending rides.
    async fn handle_join(&mut self, request: JoinRequest) -> Result<(), SessionError> {
        let actor = ActorId::new(request.actor_id);
        let now = self.state.clock.utc();

        let driver = match request.kind {
            ActorKind::Rider => None,
            ActorKind::Driver => {
                let Some(vehicle_class) = request.vehicle_class else {
                    return Err(SessionError::InvalidPayload("driver join requires a class"));
                };
                let coords = match request.location {
                    Some(point) => match Coordinates::new(point.lat, point.lng) {
                        Ok(coords) => Some(coords),
                        Err(error) => {
                            warn!(actor = %actor, error = %error, "Rejected join with invalid position");
                            return Err(SessionError::InvalidPayload("invalid position"));
                        }
                    },
                    None => None,
                };
                Some(DriverDetails {
                    vehicle_class,
                    coords,
                    online: request.online.unwrap_or(true),
                })
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .presence
            .register(actor.clone(), request.kind, tx, driver.clone(), now);
        self.identity = Some(Identity {
            actor: actor.clone(),
            kind: request.kind,
        });
        self.pending_outbound = Some(rx);
        info!(actor = %actor, kind = ?request.kind, "WebSocket session joined");

        if let Some(details) = driver {
            if details.online {
                if let Some(coords) = details.coords {
                    self.state
                        .matcher
                        .reconcile_late_joiner(&actor, coords, details.vehicle_class)
                        .await;
                }
            }
        }
        Ok(())
    }

    /// Flip driver availability. An offline-to-online transition with a
    /// known position re-runs the late-joiner match.
    async fn handle_toggle_online(
        &mut self,
        request: ToggleOnlineRequest,
    ) -> Result<(), SessionError> {
        let driver = self.require_driver()?.clone();
        let now = self.state.clock.utc();
        let Some(snapshot) = self
            .state
            .presence
            .set_availability(&driver, request.online, now)
        else {
            return Ok(());
        };
        if let Some(coords) = snapshot.coords {
            self.state
                .matcher
                .reconcile_late_joiner(&driver, coords, snapshot.vehicle_class)
                .await;
        }
        Ok(())
    }

    /// Feed one position sample into the ingest pipeline. A bad GPS fix
    /// is logged and dropped; it never tears down the connection. A
    /// driver who joined online without a position becomes matchable on
    /// its first accepted fix, so the late-joiner check runs then.
    async fn handle_location_update(
        &mut self,
        request: LocationUpdateRequest,
    ) -> Result<(), SessionError> {
        let driver = self.require_driver()?.clone();
        let first_fix = self
            .state
            .presence
            .driver_snapshot(&driver)
            .is_some_and(|snapshot| snapshot.online && snapshot.coords.is_none());
        let sample = LocationSample {
            lat: request.lat,
            lng: request.lng,
            heading: request.heading,
            speed_kmh: request.speed,
            accuracy_meters: request.accuracy,
            ride_id: request.ride_id.map(RideId::from),
        };
        if let Err(error) = self.state.locations.ingest(&driver, sample).await {
            warn!(driver = %driver, error = %error, "Dropped location sample");
            return Ok(());
        }
        if first_fix {
            if let Some(snapshot) = self.state.presence.driver_snapshot(&driver) {
                if let Some(coords) = snapshot.coords {
                    self.state
                        .matcher
                        .reconcile_late_joiner(&driver, coords, snapshot.vehicle_class)
                        .await;
                }
            }
        }
        Ok(())
    }

    /// Re-attach a reconnected party to its ride's feed. Refusals are
    /// answered in-band; only unauthenticated sessions are closed.
    async fn handle_rejoin(
        &mut self,
        session: &mut Session,
        request: RejoinRideRequest,
    ) -> Result<(), SessionError> {
        let identity = self
            .identity
            .as_ref()
            .ok_or(SessionError::InvalidPayload("join first"))?;
        let actor = identity.actor.clone();
        let ride_id = RideId::from(request.ride_id);

        let ride = match self.state.rides.find(ride_id).await {
            Ok(ride) => ride,
            Err(error) => {
                warn!(ride_id = %ride_id, error = %error, "Rejoin lookup failed");
                return self
                    .send_rejoin_error(session, "ride lookup failed")
                    .await;
            }
        };
        let Some(ride) = ride else {
            return self.send_rejoin_error(session, "unknown ride").await;
        };
        if ride.status.is_terminal() {
            return self.send_rejoin_error(session, "ride is finished").await;
        }
        let is_party = ride.rider == actor || ride.driver.as_ref() == Some(&actor);
        if !is_party {
            return self
                .send_rejoin_error(session, "not a party to this ride")
                .await;
        }

        self.state.presence.watch_ride(ride_id, actor);
        let event = OutboundEvent::RejoinRideSuccess(RidePartyNotice {
            ride_id,
            status: ride.status,
            driver: ride.driver,
        });
        send_json(session, &event)
            .await
            .map_err(SessionError::Network)
    }

    async fn send_rejoin_error(
        &self,
        session: &mut Session,
        reason: &str,
    ) -> Result<(), SessionError> {
        let event = OutboundEvent::RejoinRideError {
            reason: reason.to_owned(),
        };
        send_json(session, &event)
            .await
            .map_err(SessionError::Network)
    }

    fn require_driver(&self) -> Result<&ActorId, SessionError> {
        match &self.identity {
            Some(identity) if identity.kind == ActorKind::Driver => Ok(&identity.actor),
            Some(_) => Err(SessionError::InvalidPayload("drivers only")),
            None => Err(SessionError::InvalidPayload("join first")),
        }
    }

    fn touch_presence(&self) {
        if let Some(identity) = &self.identity {
            self.state
                .presence
                .mark_seen(&identity.actor, self.state.clock.utc());
        }
    }

    /// Drop presence and relay state once the session ends for any reason.
    fn teardown_presence(&mut self, superseded: bool) {
        let Some(identity) = self.identity.take() else {
            return;
        };
        // A superseding session re-registered this actor; leave its state alone.
        if superseded {
            return;
        }
        self.state.presence.disconnect(&identity.actor);
        if identity.kind == ActorKind::Driver {
            self.state.locations.forget(&identity.actor);
        }
        info!(actor = %identity.actor, "WebSocket session ended");
    }

    fn log_shutdown_reason(&self, error: &SessionError) {
        match error {
            SessionError::HeartbeatTimeout => {
                warn!("WebSocket heartbeat timeout; closing connection");
            }
            SessionError::Protocol(error) => {
                warn!(error = %error, "WebSocket protocol error");
            }
            SessionError::Network(error) => {
                warn!(error = %error, "WebSocket send failed; closing connection");
            }
            SessionError::InvalidPayload(_)
            | SessionError::Superseded
            | SessionError::ClientClosed(_)
            | SessionError::StreamClosed => {}
        }
    }

    fn close_action_for(error: &SessionError) -> CloseAction {
        match error {
            SessionError::HeartbeatTimeout => CloseAction::Close(Some(CloseReason {
                code: CloseCode::Normal,
                description: Some("heartbeat timeout".to_owned()),
            })),
            SessionError::Protocol(_) => CloseAction::Close(Some(CloseReason {
                code: CloseCode::Protocol,
                description: Some("protocol error".to_owned()),
            })),
            SessionError::InvalidPayload(reason) => CloseAction::Close(Some(CloseReason {
                code: CloseCode::Policy,
                description: Some((*reason).to_owned()),
            })),
            SessionError::Superseded => CloseAction::Close(Some(CloseReason {
                code: CloseCode::Normal,
                description: Some("session replaced".to_owned()),
            })),
            SessionError::ClientClosed(reason) => CloseAction::Close(reason.clone()),
            SessionError::StreamClosed | SessionError::Network(_) => CloseAction::None,
        }
    }

    async fn close_session_if_needed(session: Session, close_action: CloseAction) {
        if let CloseAction::Close(reason) = close_action {
            if let Err(error) = session.close(reason).await {
                warn!(error = %error, "Failed to close WebSocket session");
            }
        }
    }
}

async fn recv_outbound(
    outbound: &mut Option<UnboundedReceiver<OutboundEvent>>,
) -> Option<OutboundEvent> {
    match outbound {
        Some(rx) => rx.recv().await,
        // Not joined yet; park this select arm.
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;

#[expect(
    clippy::panic_in_result_fn,
    reason = "schema drift fails fast in debug builds"
)]
async fn send_json<T: serde::Serialize>(session: &mut Session, payload: &T) -> Result<(), Closed> {
    match serde_json::to_string(payload) {
        Ok(body) => session.text(body).await,
        Err(error) => {
            // In debug builds fail fast so schema drift is fixed; in release we log and keep the connection alive.
            if cfg!(debug_assertions) {
                panic!("outbound events must serialize: {error}");
            } else {
                warn!(error = %error, "Failed to serialize WebSocket payload");
                Ok(())
            }
        }
    }
}
