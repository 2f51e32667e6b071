//! Webhook HTTP server.
//!
//! Exposes the inbound surface of the bot:
//! - `POST /gitlab/hook` — webhook receiver; validates the content type,
//!   decodes the payload once, hands it to the dispatcher and acknowledges
//!   immediately. Business outcomes are never surfaced synchronously.
//! - `GET /gitlab/projects[?group=]` — minimal HTML listing of groups, or of
//!   one group's projects with protect links.
//! - `GET /gitlab/protect?project=` — apply the protection rules to a
//!   project.

use crate::config::BotConfig;
use crate::error::BotError;
use crate::models::event::WebhookEvent;
use crate::services::dispatcher::DispatchHandle;
use crate::services::gitlab_client::{GitLabClient, GitLabGroup, GitLabProject};
use crate::services::protect;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for the axum routes.
#[derive(Clone)]
pub struct AppState {
    pub dispatch: DispatchHandle,
    pub client: Arc<GitLabClient>,
    pub config: Arc<BotConfig>,
}

/// Build the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/gitlab/hook", post(receive_hook))
        .route("/gitlab/projects", get(list_projects))
        .route("/gitlab/protect", get(protect_project))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the server until the cancellation token fires.
pub async fn serve(
    port: u16,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), BotError> {
    let app = router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| BotError::internal(format!("Failed to bind to port {}: {}", port, e)))?;

    info!("webhook server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await
        .map_err(|e| BotError::internal(format!("Server error: {}", e)))
}

/// 400 with the serialized error, mirroring the structural-rejection
/// contract: the caller only ever sees "accepted" or a structural error.
fn bad_request(err: BotError) -> Response {
    (StatusCode::BAD_REQUEST, Json(err)).into_response()
}

async fn receive_hook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.starts_with("application/json") {
        return bad_request(BotError::invalid_input("invalid content type"));
    }

    match WebhookEvent::parse(&body) {
        Ok(event) => {
            // Dropped events (queue full) are logged by the dispatcher; the
            // webhook is acknowledged regardless.
            state.dispatch.submit(event);
            (StatusCode::OK, "OK").into_response()
        }
        Err(e) => bad_request(e),
    }
}

#[derive(Debug, Deserialize)]
struct ProjectsQuery {
    group: Option<i64>,
}

async fn list_projects(
    State(state): State<AppState>,
    Query(query): Query<ProjectsQuery>,
) -> Response {
    match query.group {
        None => match state.client.list_groups().await {
            Ok(groups) => Html(render_groups(&groups)).into_response(),
            Err(e) => bad_request(e),
        },
        Some(group_id) => match state.client.list_group_projects(group_id).await {
            Ok(projects) => Html(render_projects(&projects)).into_response(),
            Err(e) => bad_request(e),
        },
    }
}

#[derive(Debug, Deserialize)]
struct ProtectQuery {
    project: Option<i64>,
}

async fn protect_project(
    State(state): State<AppState>,
    Query(query): Query<ProtectQuery>,
) -> Response {
    let Some(project_id) = query.project else {
        return bad_request(BotError::invalid_input_field("project is required", "project"));
    };

    protect::protect_branches_and_tags(&state.client, project_id, &state.config).await;
    (StatusCode::OK, "OK").into_response()
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn render_groups(groups: &[GitLabGroup]) -> String {
    let mut items = String::new();
    for group in groups {
        items.push_str(&format!(
            "<li><a href=\"/gitlab/projects?group={}\">{}</a></li>\n",
            group.id,
            escape_html(&group.full_name)
        ));
    }
    format!(
        "<html><head><title>All Groups</title></head><body><h1>All Groups</h1><ul>\n{}</ul></body></html>",
        items
    )
}

fn render_projects(projects: &[GitLabProject]) -> String {
    let mut items = String::new();
    for project in projects {
        items.push_str(&format!(
            "<li>{} <a target=\"_blank\" href=\"/gitlab/protect?project={}\">protect branches and tags</a></li>\n",
            escape_html(&project.name_with_namespace),
            project.id
        ));
    }
    format!(
        "<html><head><title>Projects</title></head><body><h1>Projects:</h1><ul>\n{}</ul></body></html>",
        items
    )
}
