#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use jsonwebtoken::Algorithm;
use reqwest::StatusCode;
use serde_json::{json, Value};

use firewall_api::app::{router, AppState};
use firewall_api::auth::{AuthGuard, PrincipalResolver, TokenCodec};
use firewall_api::database::{MemoryStore, PageLimits, QueryExecutor};
use firewall_api::filter::{FieldSchema, FieldSpec, FieldType, FilterLimits};
use firewall_api::resources::{self, ResourceRegistry};

pub const TEST_SECRET: &[u8] = b"integration-test-secret";
pub const MAX_PAGE_SIZE: u32 = 100;
pub const WIDGET_COUNT: i64 = 150;

pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    pub store: MemoryStore,
    client: reqwest::Client,
}

pub fn codec() -> TokenCodec {
    TokenCodec::new(TEST_SECRET, Algorithm::HS256).expect("test codec")
}

/// Token valid for one hour carrying `scopes`.
pub fn token(subject: &str, scopes: &[&str]) -> String {
    codec()
        .issue(subject, scopes.iter().copied(), Duration::from_secs(3600))
        .expect("issue token")
        .raw
}

/// Token whose one hour lifetime ended a minute ago.
pub fn expired_token(subject: &str, scopes: &[&str]) -> String {
    let issued = chrono::Utc::now().timestamp() - 3660;
    codec()
        .issue_at(subject, scopes.iter().copied(), Duration::from_secs(3600), issued)
        .expect("issue token")
        .raw
}

/// Test-only resource with a scoped field and a nullable column.
pub fn widgets() -> FieldSchema {
    FieldSchema::new("widgets", "widgets")
        .field("name", FieldSpec::new("name", FieldType::Text))
        .field("price", FieldSpec::new("price", FieldType::Integer))
        .field("color", FieldSpec::new("color", FieldType::Text).nullable())
        .field(
            "secret",
            FieldSpec::new("secret", FieldType::Text).requires_scope("admin:widgets"),
        )
        .soft_delete("deleted_at")
}

/// Widgets 1..=150 with price `id * 10`; every fifth has no color and
/// widget 150 is soft-deleted.
pub fn seeded_store() -> MemoryStore {
    let widgets = (1..=WIDGET_COUNT)
        .map(|id| {
            json!({
                "id": id,
                "name": format!("widget-{:03}", id),
                "price": id * 10,
                "color": if id % 5 == 0 { Value::Null } else if id % 2 == 0 { json!("red") } else { json!("blue") },
                "secret": format!("s-{}", id),
                "deleted_at": if id == WIDGET_COUNT { json!("2024-01-01T00:00:00Z") } else { Value::Null },
            })
        })
        .collect();

    MemoryStore::new()
        .with_table("widgets", widgets)
        .with_table(resources::FIREWALLS, firewalls())
        .with_table(resources::FILTERING_POLICIES, filtering_policies())
        .with_table(resources::FIREWALL_RULES, firewall_rules())
        .with_table(resources::RULE_SOURCES, rule_sources())
        .with_table(resources::RULE_DESTINATIONS, rule_destinations())
        .with_table(resources::RULE_PORTS, rule_ports())
}

/// Firewalls 1 and 2 are live, firewall 3 is soft-deleted.
fn firewalls() -> Vec<Value> {
    vec![
        json!({"id": 1, "name": "edge", "created_at": "2024-01-01T00:00:00Z", "updated_at": null, "deleted_at": null}),
        json!({"id": 2, "name": "core", "created_at": "2024-02-01T00:00:00Z", "updated_at": null, "deleted_at": null}),
        json!({"id": 3, "name": "legacy", "created_at": "2024-03-01T00:00:00Z", "updated_at": null, "deleted_at": "2024-04-01T00:00:00Z"}),
    ]
}

/// Policy 3 sits under the deleted firewall and policy 4 is itself deleted.
fn filtering_policies() -> Vec<Value> {
    vec![
        json!({"id": 1, "name": "office", "default_action": "allow", "firewall_id": 1, "created_at": "2024-01-02T00:00:00Z", "deleted_at": null}),
        json!({"id": 2, "name": "public", "default_action": "deny", "firewall_id": 2, "created_at": "2024-02-02T00:00:00Z", "deleted_at": null}),
        json!({"id": 3, "name": "old-dmz", "default_action": "deny", "firewall_id": 3, "created_at": "2024-03-02T00:00:00Z", "deleted_at": null}),
        json!({"id": 4, "name": "scratch", "default_action": "deny", "firewall_id": 1, "created_at": "2024-03-03T00:00:00Z", "deleted_at": "2024-03-04T00:00:00Z"}),
    ]
}

/// Rules 1..=3 are visible; 4 and 5 hang off hidden policies.
fn firewall_rules() -> Vec<Value> {
    vec![
        json!({"id": 1, "action": "allow", "priority": 10, "description": "ssh from office", "filtering_policy_id": 1, "deleted_at": null}),
        json!({"id": 2, "action": "deny", "priority": 20, "description": "telnet", "filtering_policy_id": 1, "deleted_at": null}),
        json!({"id": 3, "action": "allow", "priority": 5, "description": "https", "filtering_policy_id": 2, "deleted_at": null}),
        json!({"id": 4, "action": "allow", "priority": 1, "description": "legacy https", "filtering_policy_id": 3, "deleted_at": null}),
        json!({"id": 5, "action": "deny", "priority": 1, "description": "scratch", "filtering_policy_id": 4, "deleted_at": null}),
    ]
}

fn rule_sources() -> Vec<Value> {
    vec![
        json!({"id": 1, "firewall_rule_id": 1, "address": "10.0.0.1", "port": null}),
        json!({"id": 2, "firewall_rule_id": 2, "address": "0.0.0.0", "port": 1024}),
        json!({"id": 3, "firewall_rule_id": 4, "address": "10.0.0.1", "port": null}),
    ]
}

fn rule_destinations() -> Vec<Value> {
    vec![
        json!({"id": 1, "firewall_rule_id": 1, "address": "192.168.1.10", "port": 22}),
        json!({"id": 2, "firewall_rule_id": 3, "address": "192.168.1.20", "port": 443}),
        json!({"id": 3, "firewall_rule_id": 3, "address": "192.168.1.21", "port": 8443}),
        json!({"id": 4, "firewall_rule_id": 4, "address": "192.168.1.20", "port": 443}),
    ]
}

fn rule_ports() -> Vec<Value> {
    vec![
        json!({"id": 1, "firewall_rule_id": 1, "number": 22}),
        json!({"id": 2, "firewall_rule_id": 2, "number": 23}),
        json!({"id": 3, "firewall_rule_id": 3, "number": 443}),
        json!({"id": 4, "firewall_rule_id": 3, "number": 80}),
        json!({"id": 5, "firewall_rule_id": 4, "number": 443}),
    ]
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        Self::start_with(seeded_store()).await
    }

    /// Serves the full router over `store` on an unused local port.
    pub async fn start_with(store: MemoryStore) -> Result<Self> {
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        let executor = QueryExecutor::new(
            Arc::new(store.clone()),
            PageLimits {
                default_limit: 25,
                max_page_size: MAX_PAGE_SIZE,
            },
            Duration::from_secs(2),
        );
        let state = AppState::new(
            AuthGuard::new(PrincipalResolver::new(Arc::new(codec()))),
            ResourceRegistry::standard().with(widgets()),
            executor,
            FilterLimits::default(),
        );

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .context("failed to bind test listener")?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, router(state)).await;
        });

        let server = Self {
            port,
            base_url,
            store,
            client: reqwest::Client::new(),
        };
        server.wait_ready(Duration::from_secs(5)).await?;
        Ok(server)
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            // Any HTTP answer means the listener is accepting
            if self.client.get(self.url("/health")).send().await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET `path`, optionally with a bearer token, returning status and JSON body.
    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<(StatusCode, Value)> {
        let mut request = self.client.get(self.url(path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let res = request.send().await?;
        let status = res.status();
        let body = res.json::<Value>().await.context("response body was not JSON")?;
        Ok((status, body))
    }

    /// GET with a raw Authorization header value.
    pub async fn get_with_header(&self, path: &str, authorization: &str) -> Result<(StatusCode, Value)> {
        let res = self
            .client
            .get(self.url(path))
            .header(reqwest::header::AUTHORIZATION, authorization)
            .send()
            .await?;
        let status = res.status();
        Ok((status, res.json::<Value>().await?))
    }
}

/// Ids of the items in a list response, in order.
pub fn ids(body: &Value) -> Vec<i64> {
    body["data"]["items"]
        .as_array()
        .map(|items| items.iter().filter_map(|item| item["id"].as_i64()).collect())
        .unwrap_or_default()
}
