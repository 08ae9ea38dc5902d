//! Request handlers.

use std::collections::BTreeMap;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::http::error::ApiError;
use crate::http::server::AppState;
use crate::services::GraphStore;

const LIST_ORGANIZATIONS: &str = "\
MATCH (o:Organization)
RETURN o.slug AS slug, o.name AS name, o.description AS description
ORDER BY o.name";

const LIST_ROLES: &str = "\
MATCH (r:Role)
OPTIONAL MATCH (r)-[:GRANTS]->(p:Permission)
WITH r, collect(p.name) AS permissions
RETURN r.slug AS slug, r.name AS name, r.description AS description,
       r.priority AS priority, r.is_system AS is_system, permissions
ORDER BY r.priority DESC";

const LIST_GROUPS: &str = "\
MATCH (g:Group)
OPTIONAL MATCH (g)-[:MANAGED_BY]->(o:Organization)
RETURN g.slug AS slug, g.name AS name, g.description AS description,
       o.slug AS organization
ORDER BY g.name";

#[derive(Debug, Serialize)]
pub struct RootBody {
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub status: &'static str,
    pub services: BTreeMap<&'static str, bool>,
}

pub async fn root() -> Json<RootBody> {
    Json(RootBody {
        service: "imbi",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness of every backing service; 503 when any is down.
pub async fn status(State(state): State<AppState>) -> Response {
    let services: BTreeMap<_, _> = state.services.readiness().await.into_iter().collect();
    let healthy = services.values().all(|ready| *ready);

    let (code, status) = if healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (code, Json(StatusBody { status, services })).into_response()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Organization {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Role {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Group {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub organization: Option<String>,
}

/// Run a read statement and decode each record into `T`.
async fn list<T: DeserializeOwned>(graph: &GraphStore, statement: &str) -> Result<Vec<T>, ApiError> {
    graph
        .run(statement, json!({}))
        .await?
        .into_iter()
        .map(|record| serde_json::from_value(Value::Object(record)).map_err(ApiError::from))
        .collect()
}

pub async fn organizations(State(state): State<AppState>) -> Result<Json<Vec<Organization>>, ApiError> {
    Ok(Json(list(&state.services.graph, LIST_ORGANIZATIONS).await?))
}

/// Roles by descending priority, each with the permissions it grants.
pub async fn roles(State(state): State<AppState>) -> Result<Json<Vec<Role>>, ApiError> {
    Ok(Json(list(&state.services.graph, LIST_ROLES).await?))
}

pub async fn groups(State(state): State<AppState>) -> Result<Json<Vec<Group>>, ApiError> {
    Ok(Json(list(&state.services.graph, LIST_GROUPS).await?))
}
