//! OpenAPI documentation configuration.
//!
//! Defines the [`ApiDoc`] struct which generates the OpenAPI
//! specification for the REST API. Paths come from the inbound layer
//! (rides, health); schemas are collected from the handler DTOs. Debug
//! builds serve the document at `/api-docs/openapi.json`.

use actix_web::{HttpResponse, get};
use utoipa::OpenApi;

/// OpenAPI document for the REST API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Ride dispatch API",
        description = "HTTP interface for ride creation, lifecycle transitions, and health probes. \
                       Real-time offers and tracking flow over the /ws WebSocket."
    ),
    servers(
        (url = "/", description = "Relative to the deployment base URL")
    ),
    paths(
        crate::api::rides::create_ride,
        crate::api::rides::accept_ride,
        crate::api::rides::start_ride,
        crate::api::rides::complete_ride,
        crate::api::rides::cancel_ride,
        crate::api::rides::active_ride,
        crate::api::health::ready,
        crate::api::health::live,
    )
)]
pub struct ApiDoc;

/// Serve the generated document; wired into debug builds only.
#[expect(clippy::unused_async, reason = "actix route handlers must be async")]
#[get("/api-docs/openapi.json")]
pub async fn openapi_json() -> HttpResponse {
    HttpResponse::Ok().json(ApiDoc::openapi())
}
