#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use serde_json::Value;

use bazaar_agent::llm::{ChatMessage, LlmClient, LlmError, LlmResponse, ToolCall, ToolDefinition};
use bazaar_agent::{ConversationHistory, ToolBackend};
use bazaar_core::auth::TokenService;
use bazaar_core::pricing::{DeterministicPromoEngine, PromoEngine};
use bazaar_db::cart::CartStore;
use bazaar_db::identity::LocalIdentityProvider;
use bazaar_db::kv::{InMemoryKeyValueStore, KeyValueStore};
use bazaar_db::repositories::{InMemoryBillRepository, InMemoryCatalog, InMemoryUserRepository};
use bazaar_db::DemoCatalog;

pub struct Harness {
    pub backend: Arc<ToolBackend>,
    pub carts: Arc<CartStore>,
    pub history: ConversationHistory,
}

pub async fn harness() -> Harness {
    build(None).await
}

/// Demo catalog seeded at `now`, with the tool clock frozen there.
pub async fn harness_at(now: DateTime<Utc>) -> Harness {
    build(Some(now)).await
}

async fn build(frozen: Option<DateTime<Utc>>) -> Harness {
    let catalog = Arc::new(InMemoryCatalog::new());
    let seeded_at = frozen.unwrap_or_else(Utc::now);
    DemoCatalog::load(catalog.as_ref(), catalog.as_ref(), catalog.as_ref(), seeded_at)
        .await
        .expect("seed demo catalog");

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
        SecretString::from("integration-test-secret-0123456789".to_string()),
        "bazaar",
        "bazaar-clients",
        Duration::days(7),
    );
    let identity = Arc::new(LocalIdentityProvider::new(Arc::new(InMemoryUserRepository::new()), tokens));
    let mut backend = ToolBackend::new(catalog.clone(), catalog, carts.clone(), identity, engine);
    if let Some(now) = frozen {
        backend = backend.with_clock(Arc::new(move || now));
    }
    let backend = Arc::new(backend);

    Harness { backend, carts, history: ConversationHistory::new(kv) }
}

pub fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall { id: id.to_string(), name: name.to_string(), arguments }
}

pub enum Scripted {
    Reply(LlmResponse),
    Fail(LlmError),
}

/// Replays canned replies in order and records every message list it saw.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Scripted>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
    fallback: Option<LlmResponse>,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self { script: Mutex::new(script.into()), seen: Mutex::new(Vec::new()), fallback: None }
    }

    /// Answers `reply` forever once the script runs out.
    pub fn repeating(reply: LlmResponse) -> Self {
        Self { script: Mutex::new(VecDeque::new()), seen: Mutex::new(Vec::new()), fallback: Some(reply) }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().expect("lock").len()
    }

    pub fn last_messages(&self) -> Vec<ChatMessage> {
        self.seen.lock().expect("lock").last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDefinition],
        _system_prompt: &str,
    ) -> Result<LlmResponse, LlmError> {
        self.seen.lock().expect("lock").push(messages.to_vec());
        let next = self.script.lock().expect("lock").pop_front();
        match (next, &self.fallback) {
            (Some(Scripted::Reply(response)), _) => Ok(response),
            (Some(Scripted::Fail(error)), _) => Err(error),
            (None, Some(reply)) => Ok(reply.clone()),
            (None, None) => Err(LlmError::Transport("script exhausted".to_string())),
        }
    }
}
