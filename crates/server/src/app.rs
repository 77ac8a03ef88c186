use std::sync::Arc;

use axum::{
    routing::{get, patch, post, put},
    Router,
};

use bazaar_agent::AgentLoop;
use bazaar_core::auth::TokenService;
use bazaar_db::cart::CartStore;

use crate::auth::GuestCookieSettings;
use crate::{assistant, carts};

#[derive(Clone)]
pub struct AppState {
    pub carts: Arc<CartStore>,
    pub assistant: Arc<AgentLoop>,
    pub tokens: Arc<TokenService>,
    pub guest_cookie: GuestCookieSettings,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/carts", get(carts::list_carts).post(carts::create_cart))
        .route("/carts/{cart_id}", get(carts::get_cart).delete(carts::delete_cart))
        .route("/carts/{cart_id}/rename", patch(carts::rename_cart))
        .route("/carts/{cart_id}/items", post(carts::add_item))
        .route(
            "/carts/{cart_id}/items/{product_id}",
            put(carts::update_item).delete(carts::remove_item),
        )
        .route("/carts/{cart_id}/checkout", post(carts::checkout))
        .route("/assistant/chat", post(assistant::chat))
        .route("/assistant/confirm", post(assistant::confirm))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        Router,
    };
    use chrono::{Duration, Utc};
    use secrecy::SecretString;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use bazaar_agent::llm::{ChatMessage, LlmClient, LlmError, LlmResponse, ToolDefinition};
    use bazaar_agent::{AgentLoop, ConversationHistory, ToolBackend};
    use bazaar_core::auth::TokenService;
    use bazaar_core::domain::user::{Role, User, UserId};
    use bazaar_core::pricing::{DeterministicPromoEngine, PromoEngine};
    use bazaar_db::cart::CartStore;
    use bazaar_db::identity::LocalIdentityProvider;
    use bazaar_db::kv::{InMemoryKeyValueStore, KeyValueStore};
    use bazaar_db::repositories::{InMemoryBillRepository, InMemoryCatalog, InMemoryUserRepository};
    use bazaar_db::DemoCatalog;

    use super::{router, AppState};
    use crate::auth::GuestCookieSettings;

    struct EchoLlm;

    #[async_trait]
    impl LlmClient for EchoLlm {
        fn provider_name(&self) -> &str {
            "echo"
        }

        async fn chat_with_tools(
            &self,
            messages: &[ChatMessage],
            _tools: &[ToolDefinition],
            _system_prompt: &str,
        ) -> Result<LlmResponse, LlmError> {
            let last = messages.last().map(|message| message.content_or_empty().to_string());
            Ok(LlmResponse::text(last.unwrap_or_default()))
        }
    }

    async fn app() -> (Router, Arc<TokenService>) {
        let catalog = Arc::new(InMemoryCatalog::new());
        DemoCatalog::load(catalog.as_ref(), catalog.as_ref(), catalog.as_ref(), Utc::now())
            .await
            .expect("seed");
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        let engine: Arc<dyn PromoEngine> = Arc::new(DeterministicPromoEngine);
        let carts = Arc::new(CartStore::new(
            kv.clone(),
            catalog.clone(),
            catalog.clone(),
            Arc::new(InMemoryBillRepository::new()),
            engine.clone(),
        ));
        let tokens = TokenService::new(
            SecretString::from("router-test-secret-0123456789abcdef".to_string()),
            "bazaar",
            "bazaar-clients",
            Duration::days(7),
        );
        let identity = Arc::new(LocalIdentityProvider::new(
            Arc::new(InMemoryUserRepository::new()),
            tokens.clone(),
        ));
        let tools = Arc::new(ToolBackend::new(catalog.clone(), catalog, carts.clone(), identity, engine));
        let assistant = AgentLoop::new(Arc::new(EchoLlm), tools, ConversationHistory::new(kv));

        let tokens = Arc::new(tokens);
        let state = AppState {
            carts,
            assistant: Arc::new(assistant),
            tokens: tokens.clone(),
            guest_cookie: GuestCookieSettings { name: "guestId".to_string(), ttl_days: 30 },
        };
        (router(state), tokens)
    }

    fn bearer(tokens: &TokenService) -> String {
        let user = User {
            id: UserId("user-42".to_string()),
            email: "ada@example.com".to_string(),
            first_name: None,
            last_name: None,
            password_hash: String::new(),
            roles: vec![Role::Client],
            created_at: Utc::now(),
        };
        format!("Bearer {}", tokens.issue(&user, Utc::now()).expect("token").token)
    }

    fn request(method: &str, uri: &str, auth: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        }
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    }

    #[tokio::test]
    async fn signed_in_customer_builds_and_checks_out_a_cart() {
        let (app, tokens) = app().await;
        let auth = bearer(&tokens);

        let added = app
            .clone()
            .oneshot(request("POST", "/carts/new/items", Some(&auth), Some(json!({"productId": 101, "quantity": 3}))))
            .await
            .expect("response");
        assert_eq!(added.status(), StatusCode::OK);
        let cart = json_body(added).await;
        let cart_id = cart["id"].as_str().expect("cart id").to_string();
        assert_eq!(cart["items"][0]["quantity"], 3);

        let more = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/carts/{cart_id}/items"),
                Some(&auth),
                Some(json!({"productId": 201, "quantity": 1})),
            ))
            .await
            .expect("response");
        assert_eq!(more.status(), StatusCode::OK);

        let checkout = app
            .clone()
            .oneshot(request("POST", &format!("/carts/{cart_id}/checkout"), Some(&auth), None))
            .await
            .expect("response");
        assert_eq!(checkout.status(), StatusCode::OK);
        let receipt = json_body(checkout).await;
        assert_eq!(receipt["bills"].as_array().map(Vec::len), Some(2));

        let gone = app
            .oneshot(request("GET", &format!("/carts/{cart_id}"), Some(&auth), None))
            .await
            .expect("response");
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn guests_receive_a_cookie_and_must_send_contact_details() {
        let (app, _) = app().await;

        let created = app
            .clone()
            .oneshot(request("POST", "/carts", None, Some(json!({"name": "Weekend"}))))
            .await
            .expect("response");
        assert_eq!(created.status(), StatusCode::CREATED);
        let cookie = created
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .expect("guest cookie")
            .to_string();
        assert!(cookie.starts_with("guestId="));
        assert!(cookie.contains("HttpOnly") && cookie.contains("SameSite=Strict"));
        let cart_id = json_body(created).await["id"].as_str().expect("id").to_string();

        let pair = cookie.split(';').next().expect("pair").to_string();
        let mut add = request(
            "POST",
            &format!("/carts/{cart_id}/items"),
            None,
            Some(json!({"productId": 202})),
        );
        add.headers_mut().insert(header::COOKIE, pair.parse().expect("cookie header"));
        let added = app.clone().oneshot(add).await.expect("response");
        assert_eq!(added.status(), StatusCode::OK);
        assert!(added.headers().get(header::SET_COOKIE).is_none());

        let mut checkout = request("POST", &format!("/carts/{cart_id}/checkout"), None, None);
        checkout.headers_mut().insert(header::COOKIE, pair.parse().expect("cookie header"));
        let refused = app.oneshot(checkout).await.expect("response");
        assert_eq!(refused.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_quantities_and_tokens_are_rejected() {
        let (app, tokens) = app().await;
        let auth = bearer(&tokens);

        let zero = app
            .clone()
            .oneshot(request("POST", "/carts/new/items", Some(&auth), Some(json!({"productId": 101, "quantity": 0}))))
            .await
            .expect("response");
        assert_eq!(zero.status(), StatusCode::BAD_REQUEST);
        let body = json_body(zero).await;
        assert!(body["correlationId"].is_string());

        let huge = app
            .clone()
            .oneshot(request(
                "POST",
                "/carts/new/items",
                Some(&auth),
                Some(json!({"productId": 101, "quantity": 4_000_000_000_i64})),
            ))
            .await
            .expect("response");
        assert_eq!(huge.status(), StatusCode::BAD_REQUEST);
        let listed = app
            .clone()
            .oneshot(request("GET", "/carts", Some(&auth), None))
            .await
            .expect("response");
        assert_eq!(json_body(listed).await.as_array().map(Vec::len), Some(0));

        let forged = app
            .oneshot(request("GET", "/carts", Some("Bearer not-a-token"), None))
            .await
            .expect("response");
        assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn assistant_chat_answers_and_confirm_requires_sign_in() {
        let (app, tokens) = app().await;

        let chat = app
            .clone()
            .oneshot(request("POST", "/assistant/chat", None, Some(json!({"message": "hello"}))))
            .await
            .expect("response");
        assert_eq!(chat.status(), StatusCode::OK);
        let reply = json_body(chat).await;
        assert_eq!(reply["providerUsed"], "echo");
        assert_eq!(reply["state"], "idle");

        let confirm_body = json!({"actionType": "add_to_cart", "payload": {"productId": 302, "shopId": 3}});
        let anonymous = app
            .clone()
            .oneshot(request("POST", "/assistant/confirm", None, Some(confirm_body.clone())))
            .await
            .expect("response");
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let auth = bearer(&tokens);
        let confirmed = app
            .oneshot(request("POST", "/assistant/confirm", Some(&auth), Some(confirm_body)))
            .await
            .expect("response");
        assert_eq!(confirmed.status(), StatusCode::OK);
        let body = json_body(confirmed).await;
        assert_eq!(body["state"], "action_executed");
        assert!(body["cartId"].is_string());
    }
}
