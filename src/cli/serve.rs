//! `permaskill serve` implementation: a self-hosted registry process.
//!
//! Runs the actor as a mailbox task and exposes the dynamic reads over
//! HTTP, plus `/message` and `/dry-run` endpoints speaking the same wire
//! format the CLI's registry transport produces. The read routes serve the
//! patch projection: an eventually-consistent snapshot refreshed after
//! every mutation.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use permaskill::error::{Error, Result};
use permaskill::process::{
    Message, ProcessHandle, RegistryProcess, SkillsSnapshot, Tag, spawn,
};
use permaskill::reads;
use permaskill::signer::address_from_owner;

use crate::ServeArgs;

#[derive(Clone)]
struct ServeState {
    handle: ProcessHandle,
    snapshot: Arc<RwLock<SkillsSnapshot>>,
}

pub async fn run(args: ServeArgs) -> Result<()> {
    let (handle, mut patches) = spawn(RegistryProcess::new());
    let snapshot = Arc::new(RwLock::new(SkillsSnapshot::new()));

    let sink = snapshot.clone();
    tokio::spawn(async move {
        while let Some(patch) = patches.recv().await {
            *sink.write().await = patch;
        }
    });

    let state = ServeState { handle, snapshot };
    let app = axum::Router::new()
        .route("/searchSkills", get(search_skills))
        .route("/getSkill", get(get_skill))
        .route("/listSkills", get(list_skills))
        .route("/getSkillVersions", get(get_skill_versions))
        .route("/getDownloadStats", get(get_download_stats))
        .route("/info", get(info))
        .route("/message/:process", post(post_message))
        .route("/dry-run/:process", post(post_dry_run))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .map_err(|e| Error::network(format!("failed to bind {}", args.bind)).with_cause(e))?;
    tracing::info!(bind = %args.bind, "registry process serving");
    axum::serve(listener, app)
        .await
        .map_err(|e| Error::network("HTTP server failed").with_cause(e))
}

type ReadFn = fn(&SkillsSnapshot, &reads::Params) -> reads::ReadResponse;

async fn respond(
    state: &ServeState,
    params: HashMap<String, String>,
    read: ReadFn,
) -> (StatusCode, Json<serde_json::Value>) {
    let snapshot = state.snapshot.read().await.clone();
    let response = read(&snapshot, &params);
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response.body))
}

macro_rules! read_route {
    ($name:ident) => {
        async fn $name(
            State(state): State<ServeState>,
            Query(params): Query<HashMap<String, String>>,
        ) -> impl IntoResponse {
            respond(&state, params, reads::$name).await
        }
    };
}

read_route!(search_skills);
read_route!(get_skill);
read_route!(list_skills);
read_route!(get_skill_versions);
read_route!(get_download_stats);
read_route!(info);

#[derive(Debug, Deserialize)]
struct WireItem {
    owner: String,
    tags: Vec<Tag>,
    #[serde(default)]
    signature: String,
}

#[derive(Debug, Deserialize)]
struct WireQuery {
    from: String,
    tags: Vec<Tag>,
}

async fn post_message(
    State(state): State<ServeState>,
    Path(_process): Path<String>,
    Json(item): Json<WireItem>,
) -> axum::response::Response {
    let owner = match URL_SAFE_NO_PAD.decode(&item.owner) {
        Ok(owner) => owner,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "owner is not base64url" })),
            )
                .into_response();
        }
    };
    let signature = URL_SAFE_NO_PAD.decode(&item.signature).unwrap_or_default();

    let msg = Message {
        id: URL_SAFE_NO_PAD.encode(Sha256::digest(&signature)),
        from: address_from_owner(&owner),
        timestamp: now_ms(),
        tags: item.tags,
    };
    deliver(&state, msg).await
}

async fn post_dry_run(
    State(state): State<ServeState>,
    Path(_process): Path<String>,
    Json(query): Json<WireQuery>,
) -> axum::response::Response {
    let msg = Message {
        id: "D".repeat(43),
        from: query.from,
        timestamp: now_ms(),
        tags: query.tags,
    };
    deliver(&state, msg).await
}

async fn deliver(state: &ServeState, msg: Message) -> axum::response::Response {
    match state.handle.call(msg).await {
        Some(out) => (
            StatusCode::OK,
            Json(serde_json::json!({ "tags": out.tags, "data": out.data })),
        )
            .into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
