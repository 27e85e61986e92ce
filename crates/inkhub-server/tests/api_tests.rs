// End-to-end tests for the REST API.
//
// Each test builds the full router over an in-memory database, a capturing
// mailer and a stub payment gateway, then drives it with `oneshot`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use inkhub_core::auth;
use inkhub_core::config::load_config_from;
use inkhub_core::db::{Database, NewUser};
use inkhub_core::mail::CapturingMailer;
use inkhub_core::model::Role;
use inkhub_core::payments::{
    CheckoutGateway, CheckoutRequest, CheckoutSession, PaymentLink, PaymentLinkRequest,
};
use inkhub_core::Marketplace;
use inkhub_server::router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const SERVER_TOML: &str = include_str!("../../../defaults/server.toml");
const BOUNDARY: &str = "inkhub-test-boundary";

// ===========================================================================
// Test helpers
// ===========================================================================

#[derive(Default)]
struct StubGateway {
    calls: AtomicUsize,
}

#[async_trait]
impl CheckoutGateway for StubGateway {
    async fn create_checkout_session(&self, _req: &CheckoutRequest) -> anyhow::Result<CheckoutSession> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CheckoutSession {
            id: format!("cs_stub_{n}"),
            checkout_url: format!("https://checkout.test/cs_stub_{n}"),
        })
    }

    async fn create_payment_link(&self, _req: &PaymentLinkRequest) -> anyhow::Result<PaymentLink> {
        Ok(PaymentLink {
            id: "link_stub".into(),
            checkout_url: "https://pay.test/link_stub".into(),
        })
    }
}

struct TestApp {
    router: Router,
    market: Arc<Marketplace>,
    _dir: TempDir,
}

fn app_with(webhook_secret: Option<&str>) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config_dir = dir.path().join("config");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(config_dir.join("server.toml"), SERVER_TOML).unwrap();
    if let Some(secret) = webhook_secret {
        std::fs::write(
            config_dir.join("credentials.toml"),
            format!("paymongo_webhook_secret = \"{secret}\"\n"),
        )
        .unwrap();
    }

    let mut config = load_config_from(dir.path()).unwrap();
    config.uploads.dir = dir.path().join("uploads").to_string_lossy().into_owned();

    let market = Arc::new(Marketplace::new(
        Database::open(":memory:").unwrap(),
        config,
        Arc::new(CapturingMailer::default()),
        Arc::new(StubGateway::default()),
    ));
    TestApp {
        router: router(market.clone()),
        market,
        _dir: dir,
    }
}

fn app() -> TestApp {
    app_with(None)
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn call(
    app: &TestApp,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    send(app, builder.body(body).unwrap()).await
}

/// `(name, value, Some(file_name))` parts into a multipart request.
fn multipart(uri: &str, token: &str, parts: &[(&str, &[u8], Option<&str>)]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value, file_name) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match file_name {
            Some(file_name) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(value);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Register, verify by code and log in. Returns `(user_id, token)`.
async fn signed_up(app: &TestApp, username: &str, role_id: i64) -> (i64, String) {
    let (status, body) = call(
        app,
        "POST",
        "/register",
        None,
        Some(json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": "secret-pass",
            "password_confirmation": "secret-pass",
            "role_id": role_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let id = body["user"]["id"].as_i64().unwrap();

    let code = app
        .market
        .db
        .get_user_record(id)
        .unwrap()
        .unwrap()
        .verification_code
        .unwrap();
    let (status, _) = call(
        app,
        "POST",
        "/verify-email",
        None,
        Some(json!({"id": id, "code": code})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        app,
        "POST",
        "/login",
        None,
        Some(json!({"email": format!("{username}@example.com"), "password": "secret-pass"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    (id, body["token"].as_str().unwrap().to_string())
}

fn admin_token(app: &TestApp) -> String {
    let db = &app.market.db;
    let admin = db
        .insert_user(&NewUser {
            username: "admin".into(),
            email: "admin@example.com".into(),
            password_hash: auth::hash_password("admin-pass").unwrap(),
            role: Role::Admin,
            verified: true,
            verification_code: None,
            verification_code_expires_at: None,
            now: Utc::now(),
        })
        .unwrap();
    db.mark_email_verified(admin.id, Utc::now()).unwrap();
    auth::issue_token(db, admin.id).unwrap()
}

/// A verified printing shop with one post priced at `price` centavos.
async fn shop_with_post(app: &TestApp, admin: &str, price: i64) -> (i64, String, i64) {
    let (shop_id, shop) = signed_up(app, "inkshop", 4).await;
    let (status, _) = call(
        app,
        "POST",
        &format!("/updateUsers/{shop_id}"),
        Some(admin),
        Some(json!({"verified": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, post) = call(
        app,
        "POST",
        "/posts",
        Some(&shop),
        Some(json!({
            "title": "Flyers",
            "content": "A5 full colour flyers",
            "price": price,
            "quantity": 100,
            "tags": [2],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{post}");
    (shop_id, shop, post["post_id"].as_i64().unwrap())
}

// ===========================================================================
// Accounts
// ===========================================================================

#[tokio::test]
async fn account_lifecycle() {
    let app = app();
    let register = json!({
        "username": "ana",
        "email": "ana@example.com",
        "password": "secret-pass",
        "password_confirmation": "secret-pass",
        "role_id": 2,
    });
    let (status, body) = call(&app, "POST", "/register", None, Some(register)).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["user"]["id"].as_i64().unwrap();

    let login = json!({"email": "ana@example.com", "password": "secret-pass"});
    let (status, _) = call(&app, "POST", "/login", None, Some(login.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &app,
        "POST",
        "/verify-email",
        None,
        Some(json!({"id": id, "code": "000000x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid verification code.");

    let code = app.market.db.get_user_record(id).unwrap().unwrap().verification_code.unwrap();
    let (status, _) = call(
        &app,
        "POST",
        "/verify-email",
        None,
        Some(json!({"id": id, "code": code})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "POST", "/login", None, Some(login)).await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = call(&app, "GET", "/current-user", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "ana");

    let (status, _) = call(&app, "POST", "/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&app, "GET", "/current-user", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthenticated.");
}

#[tokio::test]
async fn wrong_password_is_invalid_credentials() {
    let app = app();
    signed_up(&app, "ana", 2).await;
    let (status, body) = call(
        &app,
        "POST",
        "/login",
        None,
        Some(json!({"email": "ana@example.com", "password": "wrong-pass"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid credentials.");
}

#[tokio::test]
async fn registration_errors_are_field_maps() {
    let app = app();
    let (status, body) = call(
        &app,
        "POST",
        "/register",
        None,
        Some(json!({"username": "ab", "email": "nope", "role_id": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    for field in ["username", "email", "password", "role_id"] {
        assert!(body["errors"][field].is_array(), "missing {field}: {body}");
    }
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn admin_routes_reject_other_roles() {
    let app = app();
    let (_, client) = signed_up(&app, "ana", 2).await;
    for uri in ["/users", "/sales-report"] {
        let (status, _) = call(&app, "GET", uri, Some(&client), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
    }

    let admin = admin_token(&app);
    let (status, body) = call(&app, "GET", "/users?page=1", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["current_page"], 1);
}

// ===========================================================================
// Posts
// ===========================================================================

#[tokio::test]
async fn unverified_provider_cannot_post_until_approved() {
    let app = app();
    let (_, shop) = signed_up(&app, "inkshop", 4).await;
    let post = json!({"title": "Flyers", "content": "A5", "price": 1000, "quantity": 1, "tags": []});
    let (status, _) = call(&app, "POST", "/posts", Some(&shop), Some(post)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = admin_token(&app);
    approve_shop(&app, &admin).await;
}

async fn approve_shop(app: &TestApp, admin: &str) {
    let shop_id = app
        .market
        .db
        .find_user_record_by_email("inkshop@example.com")
        .unwrap()
        .unwrap()
        .user
        .id;
    let (status, body) = call(
        app,
        "POST",
        &format!("/updateUsers/{shop_id}"),
        Some(admin),
        Some(json!({"verified": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["verified"], true);
}

#[tokio::test]
async fn post_listing_and_search() {
    let app = app();
    let admin = admin_token(&app);
    shop_with_post(&app, &admin, 50_000).await;

    let (status, body) = call(&app, "GET", "/posts?page=1&limit=5", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["title"], "Flyers");
    assert_eq!(body["data"][0]["tags"][0]["name"], "Printing");

    let (status, body) = call(&app, "GET", "/search-by-tag", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Tag parameter is required");

    let (_, body) = call(&app, "GET", "/search-by-tag?tag=print", None, None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    let (_, body) = call(&app, "GET", "/search-posts?q=COLOUR", None, None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    let (_, body) = call(&app, "GET", "/tags", None, None).await;
    assert_eq!(body.as_array().unwrap().len(), 10);
}

#[tokio::test]
async fn post_image_upload() {
    let app = app();
    let admin = admin_token(&app);
    let (shop_id, shop, post_id) = shop_with_post(&app, &admin, 50_000).await;

    let request = multipart(
        &format!("/posts/{post_id}/images"),
        &shop,
        &[("image", &b"\x89PNG fake"[..], Some("flyer.png"))],
    );
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert!(body["image_path"].as_str().unwrap().ends_with(".png"));

    let (_, images) = call(&app, "GET", &format!("/users/{shop_id}/images"), Some(&shop), None).await;
    assert_eq!(images.as_array().unwrap().len(), 1);
}

// ===========================================================================
// Requests and payments
// ===========================================================================

#[tokio::test]
async fn two_stage_payment_flow() {
    let app = app();
    let admin = admin_token(&app);
    let (shop_id, shop, post_id) = shop_with_post(&app, &admin, 100_000).await;
    let (client_id, client) = signed_up(&app, "ana", 2).await;

    let request = json!({"post_id": post_id, "target_user_id": shop_id, "request_content": "100 pcs"});
    let (status, body) = call(&app, "POST", "/payforproduct", Some(&client), Some(request.clone())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Personal information not found for the user.");

    let (status, _) = call(
        &app,
        "PUT",
        &format!("/users/{client_id}/personal_information"),
        Some(&client),
        Some(json!({"firstname": "Ana", "lastname": "Cruz"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "POST", "/payforproduct", Some(&client), Some(request)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["checkout_url"], "https://checkout.test/cs_stub_1");

    let (_, unread) = call(&app, "GET", "/notifications/unread-count", Some(&shop), None).await;
    assert_eq!(unread["unread"], 1);

    let (_, requests) = call(
        &app,
        "GET",
        &format!("/requests-with-payments/{client_id}"),
        Some(&client),
        None,
    )
    .await;
    let request_id = requests[0]["request_id"].as_i64().unwrap();
    assert_eq!(requests[0]["initial_payments"][0]["amount"], 20_000);

    // Remaining payment is refused until the gateway confirms the down payment.
    let pay80 = format!("/payforproduct80/{request_id}");
    let (status, body) = call(&app, "POST", &pay80, Some(&client), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Initial payment not yet completed or initiated");

    let event = json!({"data": {"attributes": {
        "type": "checkout_session.payment.paid",
        "data": {"id": "cs_stub_1"}
    }}});
    for _ in 0..2 {
        let (status, body) = call(&app, "POST", "/webhooks/paymongo", None, Some(event.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["confirmed"], true);
    }

    // The target may settle on behalf of the initiator's payment.
    let (status, body) = call(&app, "POST", &pay80, Some(&shop), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["payment"]["amount"], 100_000);
    assert_eq!(body["payment"]["status"], "completed");

    let (status, report) = call(&app, "GET", "/sales-report", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["total_sales"], 100_000);
    assert_eq!(report["printing_provider_sales"], 100_000);
    assert_eq!(report["top_printing_providers"][0]["username"], "inkshop");
}

#[tokio::test]
async fn requests_listing_and_response() {
    let app = app();
    let admin = admin_token(&app);
    let (shop_id, shop, post_id) = shop_with_post(&app, &admin, 10_000).await;
    let (client_id, client) = signed_up(&app, "ana", 2).await;

    let (_, body) = call(
        &app,
        "GET",
        &format!("/requests-with-payments/{client_id}"),
        Some(&client),
        None,
    )
    .await;
    assert_eq!(body["message"], "No requests found for this user.");

    let (status, body) = call(
        &app,
        "POST",
        "/requests",
        Some(&client),
        Some(json!({"post_id": post_id})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Target user ID is required to create a notification.");

    let (status, created) = call(
        &app,
        "POST",
        "/requests",
        Some(&client),
        Some(json!({"post_id": post_id, "target_user_id": shop_id})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let request_id = created["request"]["request_id"].as_i64().unwrap();

    let respond = format!("/requests/{request_id}/respond");
    let (status, _) = call(&app, "POST", &respond, Some(&client), Some(json!({"accept": true}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = call(&app, "POST", &respond, Some(&shop), Some(json!({"accept": true}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");

    let (_, notes) = call(&app, "GET", "/notifications", Some(&client), None).await;
    assert_eq!(notes[0]["content"], "inkshop has accepted your request.");
}

#[tokio::test]
async fn webhook_signature_is_enforced_with_secret() {
    let app = app_with(Some("whsk_test"));
    let body = br#"{"data":{"attributes":{"type":"payment.paid","data":{"id":"pay_1"}}}}"#;

    let unsigned = Request::builder()
        .method("POST")
        .uri("/webhooks/paymongo")
        .body(Body::from(&body[..]))
        .unwrap();
    let (status, _) = send(&app, unsigned).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let signature = inkhub_paymongo::webhook::sign("whsk_test", "1700000000", body);
    let signed = Request::builder()
        .method("POST")
        .uri("/webhooks/paymongo")
        .header("paymongo-signature", format!("t=1700000000,te={signature},li="))
        .body(Body::from(&body[..]))
        .unwrap();
    let (status, response) = send(&app, signed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["confirmed"], false);
}

// ===========================================================================
// Ratings, chat, stores
// ===========================================================================

#[tokio::test]
async fn ratings_and_summary() {
    let app = app();
    let (shop_id, _) = signed_up(&app, "inkshop", 4).await;
    let (ana_id, ana) = signed_up(&app, "ana", 2).await;
    let (_, ben) = signed_up(&app, "ben", 2).await;

    let rate = |stars: i64| json!({"rated_user_id": shop_id, "rating": stars, "content": "Great"});
    assert_eq!(call(&app, "POST", "/ratings", Some(&ana), Some(rate(5))).await.0, StatusCode::CREATED);
    assert_eq!(call(&app, "POST", "/ratings", Some(&ben), Some(rate(4))).await.0, StatusCode::CREATED);

    let (status, _) = call(
        &app,
        "POST",
        "/ratings",
        Some(&ana),
        Some(json!({"rated_user_id": ana_id, "rating": 5, "content": "me"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, list) = call(&app, "GET", &format!("/ratings/{shop_id}"), Some(&ben), None).await;
    assert_eq!(list[0]["user"]["username"], "ben");

    let (_, summary) = call(&app, "GET", &format!("/ratings/{shop_id}/summary"), None, None).await;
    assert_eq!(summary["count"], 2);
    assert_eq!(summary["average"], 4.5);

    let rating_id = list[1]["id"].as_i64().unwrap();
    let (status, body) = call(
        &app,
        "PUT",
        &format!("/ratings/{rating_id}"),
        Some(&ben),
        Some(rate(1)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "You can only edit your own ratings.");
}

#[tokio::test]
async fn chat_over_multipart() {
    let app = app();
    let (ana_id, ana) = signed_up(&app, "ana", 2).await;
    let (ben_id, ben) = signed_up(&app, "ben", 3).await;
    let receiver = ben_id.to_string();

    let request = multipart("/chats", &ana, &[
        ("receiver_id", receiver.as_bytes(), None),
        ("content", &b"hello"[..], None),
    ]);
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["sender"]["username"], "ana");

    let both = multipart("/chats", &ana, &[
        ("receiver_id", receiver.as_bytes(), None),
        ("content", &b"see attached"[..], None),
        ("file", &b"%PDF-1.4"[..], Some("quote.pdf")),
    ]);
    let (status, body) = send(&app, both).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "You cannot send a message with both text and a file.");

    let file_only = multipart("/chats", &ana, &[
        ("receiver_id", receiver.as_bytes(), None),
        ("file", &b"%PDF-1.4"[..], Some("quote.pdf")),
    ]);
    assert_eq!(send(&app, file_only).await.0, StatusCode::CREATED);

    let (_, convo) = call(&app, "GET", &format!("/chats/{ana_id}"), Some(&ben), None).await;
    assert_eq!(convo.as_array().unwrap().len(), 2);
    let (_, partners) = call(&app, "GET", "/user-chat-list", Some(&ben), None).await;
    assert_eq!(partners[0]["username"], "ana");
}

#[tokio::test]
async fn printing_shop_store() {
    let app = app();
    let (shop_id, shop) = signed_up(&app, "inkshop", 4).await;
    let (_, client) = signed_up(&app, "ana", 2).await;
    let store = json!({
        "storename": "Ink Co",
        "description": "Offset printing",
        "latitude": 14.6,
        "longitude": 121.0,
        "address": "Manila",
    });

    let (status, _) = call(&app, "POST", "/stores", Some(&client), Some(store.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, "POST", "/stores", Some(&shop), Some(store.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = call(&app, "POST", "/stores", Some(&shop), Some(store)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, found) = call(&app, "GET", &format!("/user-store/{shop_id}"), None, None).await;
    assert_eq!(found["exists"], true);
    assert_eq!(found["store"]["location"]["address"], "Manila");
}
