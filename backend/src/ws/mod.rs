//! WebSocket inbound adapter.
//!
//! Responsibilities:
//! - upgrade `/ws` requests and spawn the per-connection session loop
//! - decode client frames into domain calls
//! - forward [`crate::domain::OutboundEvent`]s from the presence registry
//!   to the connected client
//!
//! Everything stateful lives in the domain; this layer owns only framing,
//! heartbeats, and the session's identity.

use actix_web::web::{self, Payload};
use actix_web::{HttpRequest, HttpResponse, get};
use tracing::error;

mod session;

pub mod messages;
pub mod state;

/// Handle WebSocket upgrade for the `/ws` endpoint.
#[get("/ws")]
pub async fn ws_entry(
    state: web::Data<state::WsState>,
    req: HttpRequest,
    stream: Payload,
) -> actix_web::Result<HttpResponse> {
    let (response, session, message_stream) = actix_ws::handle(&req, stream).inspect_err(|e| {
        error!(error = %e, "WebSocket upgrade failed");
    })?;
    let state = state.get_ref().clone();
    actix_web::rt::spawn(session::handle_ws_session(state, session, message_stream));
    Ok(response)
}
