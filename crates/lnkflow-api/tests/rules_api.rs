//! End-to-end tests for the automation API against the in-memory store

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use chrono::{DateTime, Utc};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use uuid::Uuid;

use lnkflow_api::auth::AppState;
use lnkflow_api::create_router;
use lnkflow_common::config::EngineConfig;
use lnkflow_common::types::{ExecutionLog, RuleId, TeamId, TriggerType};
use lnkflow_common::{Error, Result};
use lnkflow_engine::{
    ActionDispatcher, EventGateway, NoopCampaignControl, NoopNotifier, RuleExecutor,
};
use lnkflow_store::models::{AutomationRule, CreateRule, RuleFilter, RuleStats, UpdateRule};
use lnkflow_store::repository::{MemoryRuleRepository, RuleRepository};

fn server_with(store: Arc<dyn RuleRepository>) -> TestServer {
    let dispatcher = Arc::new(ActionDispatcher::new(
        &EngineConfig::default(),
        Arc::new(NoopCampaignControl),
        Arc::new(NoopNotifier),
    ));
    let executor = Arc::new(RuleExecutor::new(store.clone(), dispatcher));
    let gateway = Arc::new(EventGateway::new(store.clone(), executor.clone()));
    let state = Arc::new(AppState {
        store,
        executor,
        gateway,
    });
    TestServer::new(create_router(state)).expect("test server")
}

fn server() -> (TestServer, Arc<MemoryRuleRepository>) {
    let store = Arc::new(MemoryRuleRepository::new());
    (server_with(store.clone()), store)
}

fn team_header(team_id: Uuid) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-team-id"),
        HeaderValue::from_str(&team_id.to_string()).unwrap(),
    )
}

fn rule_body() -> Value {
    json!({
        "name": "pause on click spike",
        "trigger_type": "clicks_threshold",
        "trigger_condition": {
            "threshold": 100.0,
            "operator": "gte",
            "metric": "clicks"
        },
        "actions": [
            { "type": "pause_campaign", "campaign_id": Uuid::new_v4() }
        ]
    })
}

async fn create_rule(server: &TestServer, team_id: Uuid, body: Value) -> Value {
    let (name, value) = team_header(team_id);
    let response = server
        .post(&format!("/api/v1/teams/{}/automation", team_id))
        .add_header(name, value)
        .json(&body)
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    response.json::<Value>()
}

#[tokio::test]
async fn test_create_and_list() {
    let (server, _) = server();
    let team_id = Uuid::new_v4();

    let created = create_rule(&server, team_id, rule_body()).await;
    assert_eq!(created["status"], "active");
    assert_eq!(created["is_enabled"], true);
    assert_eq!(created["execution_count"], 0);

    let (name, value) = team_header(team_id);
    let response = server
        .get(&format!("/api/v1/teams/{}/automation", team_id))
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let list = response.json::<Value>();
    assert_eq!(list["total"], 1);
    assert_eq!(list["data"][0]["name"], "pause on click spike");
}

#[tokio::test]
async fn test_list_pagination() {
    let (server, _) = server();
    let team_id = Uuid::new_v4();
    for _ in 0..3 {
        create_rule(&server, team_id, rule_body()).await;
    }

    let (name, value) = team_header(team_id);
    let response = server
        .get(&format!("/api/v1/teams/{}/automation", team_id))
        .add_query_param("page", "2")
        .add_query_param("limit", "2")
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let list = response.json::<Value>();
    assert_eq!(list["total"], 3);
    assert_eq!(list["page"], 2);
    assert_eq!(list["limit"], 2);
    assert_eq!(list["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_team_header_is_unauthorized() {
    let (server, _) = server();
    let team_id = Uuid::new_v4();
    let response = server
        .get(&format!("/api/v1/teams/{}/automation", team_id))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_cross_team_path_is_forbidden() {
    let (server, _) = server();
    let caller = Uuid::new_v4();
    let other = Uuid::new_v4();
    let (name, value) = team_header(caller);
    let response = server
        .get(&format!("/api/v1/teams/{}/automation", other))
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_validation_rejects_empty_actions() {
    let (server, _) = server();
    let team_id = Uuid::new_v4();
    let mut body = rule_body();
    body["actions"] = json!([]);

    let (name, value) = team_header(team_id);
    let response = server
        .post(&format!("/api/v1/teams/{}/automation", team_id))
        .add_header(name, value)
        .json(&body)
        .await;
    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_manual_execute() {
    let (server, store) = server();
    let team_id = Uuid::new_v4();
    let created = create_rule(&server, team_id, rule_body()).await;
    let rule_id: Uuid = created["id"].as_str().unwrap().parse().unwrap();

    let (name, value) = team_header(team_id);
    let response = server
        .post(&format!(
            "/api/v1/teams/{}/automation/{}/execute",
            team_id, rule_id
        ))
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let log = response.json::<Value>();
    assert_eq!(log["status"], "success");

    let rule = store.get(rule_id).await.unwrap().unwrap();
    assert_eq!(rule.execution_count, 1);
}

#[tokio::test]
async fn test_enable_resets_completed_rule() {
    let (server, store) = server();
    let team_id = Uuid::new_v4();
    let mut body = rule_body();
    body["max_executions"] = json!(1);
    let created = create_rule(&server, team_id, body).await;
    let rule_id: Uuid = created["id"].as_str().unwrap().parse().unwrap();

    let (name, value) = team_header(team_id);
    server
        .post(&format!(
            "/api/v1/teams/{}/automation/{}/execute",
            team_id, rule_id
        ))
        .add_header(name.clone(), value.clone())
        .await;
    assert_eq!(store.get(rule_id).await.unwrap().unwrap().status, "completed");

    let response = server
        .post(&format!(
            "/api/v1/teams/{}/automation/{}/enable",
            team_id, rule_id
        ))
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let rule = response.json::<Value>();
    assert_eq!(rule["status"], "active");
    assert_eq!(rule["is_enabled"], true);
}

#[tokio::test]
async fn test_bulk_disable_reports_partial_failure() {
    let (server, store) = server();
    let team_id = Uuid::new_v4();
    let other_team = Uuid::new_v4();

    let mine = create_rule(&server, team_id, rule_body()).await;
    let theirs = create_rule(&server, other_team, rule_body()).await;
    let my_id: Uuid = mine["id"].as_str().unwrap().parse().unwrap();
    let their_id: Uuid = theirs["id"].as_str().unwrap().parse().unwrap();

    let (name, value) = team_header(team_id);
    let response = server
        .post(&format!("/api/v1/teams/{}/automation/bulk/disable", team_id))
        .add_header(name, value)
        .json(&json!({ "rule_ids": [my_id, their_id] }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body = response.json::<Value>();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["id"], my_id.to_string());
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[1]["success"], false);
    assert_eq!(results[1]["error"], "无权操作");

    // Only the caller's rule changed
    assert!(!store.get(my_id).await.unwrap().unwrap().is_enabled);
    assert!(store.get(their_id).await.unwrap().unwrap().is_enabled);
}

#[tokio::test]
async fn test_check_event_triggers_matching_rules() {
    let (server, store) = server();
    let team_id = Uuid::new_v4();
    let created = create_rule(&server, team_id, rule_body()).await;
    let rule_id: Uuid = created["id"].as_str().unwrap().parse().unwrap();

    let (name, value) = team_header(team_id);
    let response = server
        .post(&format!(
            "/api/v1/teams/{}/automation/check-event",
            team_id
        ))
        .add_header(name, value)
        .json(&json!({
            "eventType": "clicks_threshold",
            "eventData": { "clicks": 250 }
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    let triggered = body["triggered"].as_array().unwrap();
    assert_eq!(triggered.len(), 1);
    assert_eq!(triggered[0]["status"], "success");

    assert_eq!(store.get(rule_id).await.unwrap().unwrap().execution_count, 1);
}

#[tokio::test]
async fn test_history_newest_first() {
    let (server, _) = server();
    let team_id = Uuid::new_v4();
    let created = create_rule(&server, team_id, rule_body()).await;
    let rule_id: Uuid = created["id"].as_str().unwrap().parse().unwrap();

    let (name, value) = team_header(team_id);
    for _ in 0..3 {
        server
            .post(&format!(
                "/api/v1/teams/{}/automation/{}/execute",
                team_id, rule_id
            ))
            .add_header(name.clone(), value.clone())
            .await;
    }

    let response = server
        .get(&format!(
            "/api/v1/teams/{}/automation/{}/history",
            team_id, rule_id
        ))
        .add_query_param("limit", "2")
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let history = response.json::<Value>();
    let entries = history.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    let first: chrono::DateTime<chrono::Utc> =
        entries[0]["timestamp"].as_str().unwrap().parse().unwrap();
    let second: chrono::DateTime<chrono::Utc> =
        entries[1]["timestamp"].as_str().unwrap().parse().unwrap();
    assert!(first >= second);
}

/// Store whose count query always fails; everything else delegates to
/// the in-memory repository.
struct FailingCountStore(MemoryRuleRepository);

#[async_trait::async_trait]
impl RuleRepository for FailingCountStore {
    async fn create(&self, input: CreateRule) -> Result<AutomationRule> {
        self.0.create(input).await
    }
    async fn get(&self, id: RuleId) -> Result<Option<AutomationRule>> {
        self.0.get(id).await
    }
    async fn get_by_team(&self, team_id: TeamId, id: RuleId) -> Result<Option<AutomationRule>> {
        self.0.get_by_team(team_id, id).await
    }
    async fn list_by_team(
        &self,
        team_id: TeamId,
        filter: &RuleFilter,
    ) -> Result<Vec<AutomationRule>> {
        self.0.list_by_team(team_id, filter).await
    }
    async fn count_by_team(&self, _team_id: TeamId, _filter: &RuleFilter) -> Result<i64> {
        Err(Error::Database("count unavailable".to_string()))
    }
    async fn update(
        &self,
        team_id: TeamId,
        id: RuleId,
        input: UpdateRule,
    ) -> Result<Option<AutomationRule>> {
        self.0.update(team_id, id, input).await
    }
    async fn delete(&self, team_id: TeamId, id: RuleId) -> Result<bool> {
        self.0.delete(team_id, id).await
    }
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<AutomationRule>> {
        self.0.list_due(now).await
    }
    async fn list_candidates(
        &self,
        team_id: TeamId,
        trigger_type: TriggerType,
    ) -> Result<Vec<AutomationRule>> {
        self.0.list_candidates(team_id, trigger_type).await
    }
    async fn append_history(&self, id: RuleId, log: ExecutionLog) -> Result<()> {
        self.0.append_history(id, log).await
    }
    async fn persist_execution(
        &self,
        rule: &AutomationRule,
        expected_count: i32,
        log: ExecutionLog,
    ) -> Result<bool> {
        self.0.persist_execution(rule, expected_count, log).await
    }
    async fn stats(&self, team_id: TeamId, since: DateTime<Utc>) -> Result<RuleStats> {
        self.0.stats(team_id, since).await
    }
}

#[tokio::test]
async fn test_list_surfaces_count_failure() {
    let server = server_with(Arc::new(FailingCountStore(MemoryRuleRepository::new())));
    let team_id = Uuid::new_v4();
    let (name, value) = team_header(team_id);
    let response = server
        .get(&format!("/api/v1/teams/{}/automation", team_id))
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_delete_rule() {
    let (server, store) = server();
    let team_id = Uuid::new_v4();
    let created = create_rule(&server, team_id, rule_body()).await;
    let rule_id: Uuid = created["id"].as_str().unwrap().parse().unwrap();

    let (name, value) = team_header(team_id);
    let response = server
        .delete(&format!("/api/v1/teams/{}/automation/{}", team_id, rule_id))
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), StatusCode::NO_CONTENT);
    assert!(store.get(rule_id).await.unwrap().is_none());
}
