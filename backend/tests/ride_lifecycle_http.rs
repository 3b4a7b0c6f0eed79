//! HTTP-level lifecycle tests over the assembled engine.
//!
//! Exercise the real handlers against the in-memory store and the
//! fixture route provider: every transition, every refusal, and the
//! one-time code gate, all through the public REST surface.

use actix_web::{App, test, web};
use dispatch::api::rides;
use dispatch::server::{Engine, ServerConfig, build_engine};
use serde_json::{Value, json};
use uuid::Uuid;

fn test_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".parse().expect("loopback addr"),
        routing_url: None,
    }
}

macro_rules! ride_app {
    () => {{
        let Engine { lifecycle, .. } = build_engine(&test_config()).expect("engine");
        test::init_service(
            App::new()
                .app_data(web::Data::from(lifecycle))
                .service(rides::create_ride)
                .service(rides::accept_ride)
                .service(rides::start_ride)
                .service(rides::complete_ride)
                .service(rides::cancel_ride)
                .service(rides::active_ride),
        )
        .await
    }};
}

fn create_payload() -> Value {
    json!({
        "riderId": "rider-1",
        "pickupAddress": "Av. Principal 5",
        "destinationAddress": "Terminal",
        "vehicleClass": "car",
        "paymentMethod": "cash"
    })
}

async fn create_ride(app: &impl actix_web::dev::Service<
    actix_http::Request,
    Response = actix_web::dev::ServiceResponse,
    Error = actix_web::Error,
>) -> Value {
    let request = test::TestRequest::post()
        .uri("/rides")
        .set_json(create_payload())
        .to_request();
    let response = test::call_service(app, request).await;
    assert_eq!(response.status(), 201);
    test::read_body_json(response).await
}

async fn post_json(
    app: &impl actix_web::dev::Service<
        actix_http::Request,
        Response = actix_web::dev::ServiceResponse,
        Error = actix_web::Error,
    >,
    uri: &str,
    payload: Value,
) -> (u16, Value) {
    let request = test::TestRequest::post()
        .uri(uri)
        .set_json(payload)
        .to_request();
    let response = test::call_service(app, request).await;
    let status = response.status().as_u16();
    (status, test::read_body_json(response).await)
}

#[actix_rt::test]
async fn create_returns_the_quote_and_the_one_time_code() {
    let app = ride_app!();

    let ride = create_ride(&app).await;

    assert_eq!(ride["status"], "pending");
    assert_eq!(ride["rider"], "rider-1");
    assert_eq!(ride["fare"], 10.0);
    let otp = ride["otp"].as_str().expect("otp present");
    assert_eq!(otp.len(), 6);
    assert!(ride.get("otpExpiresAt").is_some());
}

#[actix_rt::test]
async fn full_happy_path_reaches_completed() {
    let app = ride_app!();
    let ride = create_ride(&app).await;
    let id = ride["id"].as_str().expect("id").to_owned();
    let otp = ride["otp"].as_str().expect("otp").to_owned();

    let (status, accepted) = post_json(
        &app,
        &format!("/rides/{id}/accept"),
        json!({ "driverId": "driver-1" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(accepted["status"], "accepted");
    assert_eq!(accepted["driver"], "driver-1");
    assert!(accepted.get("otp").is_none(), "driver view withholds the code");

    let (status, started) = post_json(
        &app,
        &format!("/rides/{id}/start"),
        json!({ "driverId": "driver-1", "otp": otp }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(started["status"], "ongoing");

    let (status, completed) = post_json(
        &app,
        &format!("/rides/{id}/complete"),
        json!({ "driverId": "driver-1" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(completed["status"], "completed");

    // Terminal rides are no longer active for the rider.
    let request = test::TestRequest::get()
        .uri("/riders/rider-1/rides/active")
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 404);
}

#[actix_rt::test]
async fn second_accept_gets_already_taken() {
    let app = ride_app!();
    let ride = create_ride(&app).await;
    let id = ride["id"].as_str().expect("id").to_owned();

    let (status, _) = post_json(
        &app,
        &format!("/rides/{id}/accept"),
        json!({ "driverId": "driver-1" }),
    )
    .await;
    assert_eq!(status, 200);

    let (status, body) = post_json(
        &app,
        &format!("/rides/{id}/accept"),
        json!({ "driverId": "driver-2" }),
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(body["code"], "already_taken");
}

#[actix_rt::test]
async fn accept_of_an_unknown_ride_is_not_found() {
    let app = ride_app!();
    let (status, body) = post_json(
        &app,
        &format!("/rides/{}/accept", Uuid::new_v4()),
        json!({ "driverId": "driver-1" }),
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(body["code"], "not_found");
}

#[actix_rt::test]
async fn start_before_accept_is_a_conflict() {
    let app = ride_app!();
    let ride = create_ride(&app).await;
    let id = ride["id"].as_str().expect("id").to_owned();
    let otp = ride["otp"].as_str().expect("otp").to_owned();

    let (status, body) = post_json(
        &app,
        &format!("/rides/{id}/start"),
        json!({ "driverId": "driver-1", "otp": otp }),
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(body["code"], "not_accepted");
}

#[actix_rt::test]
async fn three_wrong_codes_lock_the_ride_even_for_the_right_one() {
    let app = ride_app!();
    let ride = create_ride(&app).await;
    let id = ride["id"].as_str().expect("id").to_owned();
    let otp = ride["otp"].as_str().expect("otp").to_owned();
    let wrong = if otp == "000000" { "000001" } else { "000000" };

    let (status, _) = post_json(
        &app,
        &format!("/rides/{id}/accept"),
        json!({ "driverId": "driver-1" }),
    )
    .await;
    assert_eq!(status, 200);

    for remaining in [2, 1] {
        let (status, body) = post_json(
            &app,
            &format!("/rides/{id}/start"),
            json!({ "driverId": "driver-1", "otp": wrong }),
        )
        .await;
        assert_eq!(status, 403);
        assert_eq!(body["code"], "invalid_otp");
        assert_eq!(body["details"]["attemptsRemaining"], remaining);
    }

    let (status, body) = post_json(
        &app,
        &format!("/rides/{id}/start"),
        json!({ "driverId": "driver-1", "otp": wrong }),
    )
    .await;
    assert_eq!(status, 403);
    assert_eq!(body["code"], "otp_exhausted");

    // The correct code no longer opens the gate.
    let (status, body) = post_json(
        &app,
        &format!("/rides/{id}/start"),
        json!({ "driverId": "driver-1", "otp": otp }),
    )
    .await;
    assert_eq!(status, 403);
    assert_eq!(body["code"], "otp_exhausted");
}

#[actix_rt::test]
async fn cancel_by_a_stranger_is_rejected() {
    let app = ride_app!();
    let ride = create_ride(&app).await;
    let id = ride["id"].as_str().expect("id").to_owned();

    let (status, body) = post_json(
        &app,
        &format!("/rides/{id}/cancel"),
        json!({ "party": "driver", "actorId": "driver-99" }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "invalid_request");
}

#[actix_rt::test]
async fn rider_cancel_records_the_cancelling_party() {
    let app = ride_app!();
    let ride = create_ride(&app).await;
    let id = ride["id"].as_str().expect("id").to_owned();

    let (status, body) = post_json(
        &app,
        &format!("/rides/{id}/cancel"),
        json!({ "party": "rider", "actorId": "rider-1" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["cancelledBy"], "rider");

    // Cancelling again refuses: the ride is already terminal.
    let (status, body) = post_json(
        &app,
        &format!("/rides/{id}/cancel"),
        json!({ "party": "rider", "actorId": "rider-1" }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "invalid_request");
}

#[actix_rt::test]
async fn create_with_a_blank_address_is_rejected() {
    let app = ride_app!();
    let mut payload = create_payload();
    payload["pickupAddress"] = json!("   ");

    let request = test::TestRequest::post()
        .uri("/rides")
        .set_json(payload)
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 400);
    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["code"], "invalid_request");
}
