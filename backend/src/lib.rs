//! Real-time ride dispatch and tracking engine.
//!
//! Layout follows ports-and-adapters: `domain` owns entities, services,
//! and outbound port traits; `api` and `ws` are the inbound adapters;
//! `outbound` holds the store, geo index, and route provider adapters;
//! `server` wires everything together.

pub mod api;
pub mod doc;
pub mod domain;
pub mod outbound;
pub mod server;
pub mod ws;

/// Public OpenAPI surface used by tooling.
pub use doc::ApiDoc;
