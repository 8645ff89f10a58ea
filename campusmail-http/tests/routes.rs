use std::{sync::Arc, time::Duration};

use axum::{
    body::{to_bytes, Body},
    http::{header::RETRY_AFTER, Method, Request, StatusCode},
    Router,
};
use campusmail::{
    Clock, DryRunSender, EventEmitter, InMemoryMailStore, MailSettings, ManualClock, RunMode,
    User,
};
use campusmail_http::{
    auth::StaticResolver,
    config::{Config, ConfigError},
    router,
    state::{AppState, Components},
};
use serde_json::{json, Value};
use tower::ServiceExt;

struct Harness {
    app: Router,
    clock: Arc<ManualClock>,
    sender: DryRunSender,
}

fn components(settings: MailSettings, clock: Arc<ManualClock>, sender: DryRunSender) -> Components {
    Components {
        settings,
        clock,
        store: Arc::new(InMemoryMailStore::new()),
        sender: Arc::new(sender),
        events: EventEmitter::null(),
    }
}

fn student() -> Arc<StaticResolver> {
    Arc::new(StaticResolver::new(User { email: "a@princeton.edu".into(), name: "A Student".into() }))
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::starting_now());
    let sender = DryRunSender::new();
    let components = components(MailSettings::default(), clock.clone(), sender.clone());
    let state = AppState::build(&components, student()).unwrap();
    Harness { app: router(Arc::new(state)), clock, sender }
}

#[tokio::test]
async fn zero_timeout_is_a_config_error() {
    let settings = MailSettings::default().with_timeouts(Duration::ZERO, Duration::from_secs(10));
    let components =
        components(settings, Arc::new(ManualClock::starting_now()), DryRunSender::new());

    let err = AppState::build(&components, student()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { key: "timeouts", .. }));
    assert!(err.to_string().contains("store timeout"));
    assert!(components.dispatcher().is_err());
}

#[test]
fn only_the_server_needs_the_auth_domain() {
    let keys = |key: &str| match key {
        "MAILJET_PUBLIC_KEY" => Some("pub".to_string()),
        "MAILJET_PRIVATE_KEY" => Some("priv".to_string()),
        _ => None,
    };
    let config = Config::from_lookup(keys).unwrap();
    let components = Components::from_config(&config).unwrap();
    assert!(components.dispatcher().is_ok());
    assert!(matches!(
        AppState::identity_for(&config),
        Err(ConfigError::Missing { key: "CAMPUSMAIL_AUTH_DOMAIN" })
    ));

    let mut debug = config.clone();
    debug.mode = RunMode::Debug;
    assert!(AppState::identity_for(&debug).is_ok());
}

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", "Bearer token")
        .header("content-type", "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, String) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
}

fn mail(schedule: &str) -> Value {
    json!({
        "Header": "Study break in Butler",
        "Sender": "Butler College",
        "Body": "<p>Snacks at 9</p>",
        "Schedule": schedule,
    })
}

#[tokio::test]
async fn second_send_within_window_is_429() {
    let h = harness();

    let (status, _, body) = call(&h.app, request(Method::POST, "/mail/send", Some(mail("now")))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({ "Status": "OK" }));

    let (status, headers, body) =
        call(&h.app, request(Method::POST, "/mail/send", Some(mail("now")))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body.contains("6 hours"));
    let retry: u64 = headers[RETRY_AFTER].to_str().unwrap().parse().unwrap();
    assert!(retry > 0 && retry <= 6 * 3600);
    assert_eq!(h.sender.sent().len(), 1);
}

#[tokio::test]
async fn missing_token_is_401() {
    let h = harness();
    let req = Request::builder().uri("/mail/scheduled/user").body(Body::empty()).unwrap();
    let (status, _, _) = call(&h.app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_body_is_400() {
    let h = harness();
    let req = Request::builder()
        .method(Method::POST)
        .uri("/mail/send")
        .header("authorization", "Bearer token")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _, body) = call(&h.app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Malformed payload");
}

#[tokio::test]
async fn validation_errors_are_400_and_free() {
    let h = harness();
    let mut short = mail("now");
    short["Sender"] = json!("ab");
    let (status, _, body) = call(&h.app, request(Method::POST, "/mail/send", Some(short))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("sender name"));

    let (status, _, _) = call(&h.app, request(Method::POST, "/mail/send", Some(mail("now")))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn schedule_list_and_cancel() {
    let h = harness();
    let at = (h.clock.now() + chrono::Duration::hours(2)).to_rfc3339();

    let (status, _, _) = call(&h.app, request(Method::POST, "/mail/send", Some(mail(&at)))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.sender.sent().is_empty());

    let (status, _, body) = call(&h.app, request(Method::GET, "/mail/scheduled/user", None)).await;
    assert_eq!(status, StatusCode::OK);
    let list: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(list["status"], "used");
    assert_eq!(list["scheduledMail"].as_array().unwrap().len(), 1);
    assert_eq!(list["scheduledMail"][0]["header"], "Study break in Butler");

    let cancel = json!({ "Schedule": at });
    let (status, _, _) =
        call(&h.app, request(Method::DELETE, "/mail/scheduled", Some(cancel.clone()))).await;
    assert_eq!(status, StatusCode::OK);

    let (_, _, body) = call(&h.app, request(Method::GET, "/mail/scheduled/user", None)).await;
    let list: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(list["status"], "unused");

    let (status, _, _) = call(&h.app, request(Method::DELETE, "/mail/scheduled", Some(cancel))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_schedule_is_a_conflict_not_a_rate_limit() {
    let h = harness();
    let at = (h.clock.now() + chrono::Duration::hours(2)).to_rfc3339();
    let send = |schedule: &str| request(Method::POST, "/mail/send", Some(mail(schedule)));

    let (status, _, _) = call(&h.app, send(&at)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, headers, _) = call(&h.app, send(&at)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(headers.get(RETRY_AFTER).is_none());

    let cancel = json!({ "Schedule": at });
    let (status, _, _) = call(&h.app, request(Method::DELETE, "/mail/scheduled", Some(cancel))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = call(&h.app, send(&at)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = call(&h.app, send("now")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.sender.sent().len(), 1);
}

#[tokio::test]
async fn test_mail_has_a_one_minute_window() {
    let h = harness();
    let (status, _, _) =
        call(&h.app, request(Method::POST, "/mail/sendTestMail", Some(mail("now")))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) =
        call(&h.app, request(Method::POST, "/mail/sendTestMail", Some(mail("now")))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    h.clock.advance(Duration::from_secs(61));
    let (status, _, _) =
        call(&h.app, request(Method::POST, "/mail/sendTestMail", Some(mail("now")))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn digest_lifecycle() {
    let h = harness();
    let (_, _, body) = call(&h.app, request(Method::GET, "/mail/digest", None)).await;
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({ "Status": "unused" }));

    let entry = json!({
        "Title": "Lost water bottle",
        "Category": "lost",
        "Description": "Blue, left in Frist",
        "Link": "https://i.imgur.com/abc.png",
    });
    let (status, _, _) = call(&h.app, request(Method::POST, "/mail/digest", Some(entry))).await;
    assert_eq!(status, StatusCode::OK);

    let (_, _, body) = call(&h.app, request(Method::GET, "/mail/digest", None)).await;
    let digest: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(digest["Status"], "used");
    assert_eq!(digest["Title"], "Lost water bottle");
    assert_eq!(digest["Category"], "lost");
    assert_eq!(digest["Email"], "a@princeton.edu");

    let (status, _, _) = call(&h.app, request(Method::DELETE, "/mail/digest", None)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, body) = call(&h.app, request(Method::DELETE, "/mail/digest", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("create one first"));
}
