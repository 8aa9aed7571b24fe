use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::Method,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use vestnik_shared::protocol::{
    AckEnvelope, AdminDump, CreateGroupRequest, GroupEnvelope, GroupsEnvelope, JoinGroupRequest,
    LoginRequest, MembersEnvelope, MessagesEnvelope, PostMessageRequest, RegisterRequest,
    UserEnvelope, UsersEnvelope,
};
use vestnik_shared::{GroupId, Message, UserId};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::state::Registry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RwLock<Registry>>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::new())),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/groups", get(list_groups).post(create_group))
        .route("/groups/join", post(join_group))
        .route("/groups/members", get(list_members))
        .route("/messages", get(list_messages).post(post_message))
        .route("/users", get(search_users))
        .route("/admin/chats", get(admin_chats))
        .fallback(not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Extraction helpers
// ---------------------------------------------------------------------------

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ServerError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ServerError::BadRequest(e.body_text()))
}

fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, ServerError> {
    params
        .map(|Query(value)| value)
        .map_err(|e| ServerError::BadRequest(e.body_text()))
}

#[derive(Deserialize)]
struct UserQuery {
    user_id: Option<UserId>,
}

#[derive(Deserialize)]
struct GroupQuery {
    group_id: Option<GroupId>,
}

impl GroupQuery {
    fn require(self) -> Result<GroupId, ServerError> {
        self.group_id
            .ok_or_else(|| ServerError::Rejected("group_id is required".into()))
    }
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    name: String,
    version: &'static str,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<UserEnvelope>, ServerError> {
    let req = body(payload)?;
    let user = state.registry.write().await.register(req, &state.config)?;
    Ok(Json(UserEnvelope { user }))
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<UserEnvelope>, ServerError> {
    let req = body(payload)?;
    let user = state.registry.write().await.login(req)?;
    debug!(user = %user.handle, "Login");
    Ok(Json(UserEnvelope { user }))
}

async fn list_groups(
    State(state): State<AppState>,
    params: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<GroupsEnvelope>, ServerError> {
    let params = query(params)?;
    let groups = state.registry.read().await.groups(params.user_id);
    Ok(Json(GroupsEnvelope { groups }))
}

async fn create_group(
    State(state): State<AppState>,
    payload: Result<Json<CreateGroupRequest>, JsonRejection>,
) -> Result<Json<GroupEnvelope>, ServerError> {
    let req = body(payload)?;
    let group = state.registry.write().await.create_group(req)?;
    Ok(Json(GroupEnvelope { group }))
}

async fn join_group(
    State(state): State<AppState>,
    payload: Result<Json<JoinGroupRequest>, JsonRejection>,
) -> Result<Json<AckEnvelope>, ServerError> {
    let req = body(payload)?;
    state.registry.write().await.join(req)?;
    Ok(Json(AckEnvelope { ok: true }))
}

async fn list_members(
    State(state): State<AppState>,
    params: Result<Query<GroupQuery>, QueryRejection>,
) -> Result<Json<MembersEnvelope>, ServerError> {
    let group_id = query(params)?.require()?;
    let members = state.registry.read().await.members(group_id);
    Ok(Json(MembersEnvelope { members }))
}

async fn list_messages(
    State(state): State<AppState>,
    params: Result<Query<GroupQuery>, QueryRejection>,
) -> Result<Json<MessagesEnvelope>, ServerError> {
    let group_id = query(params)?.require()?;
    let messages = state
        .registry
        .read()
        .await
        .messages(group_id, state.config.message_history_limit);
    Ok(Json(MessagesEnvelope { messages }))
}

#[derive(Serialize)]
struct PostedResponse {
    message: Message,
}

async fn post_message(
    State(state): State<AppState>,
    payload: Result<Json<PostMessageRequest>, JsonRejection>,
) -> Result<Json<PostedResponse>, ServerError> {
    let req = body(payload)?;
    let message = state.registry.write().await.post(req)?;
    debug!(group = %message.group_id, msg_id = %message.id, "Message posted");
    Ok(Json(PostedResponse { message }))
}

async fn search_users(
    State(state): State<AppState>,
    params: Result<Query<SearchQuery>, QueryRejection>,
) -> Result<Json<UsersEnvelope>, ServerError> {
    let params = query(params)?;
    let users = state
        .registry
        .read()
        .await
        .search(&params.q, state.config.user_search_limit);
    Ok(Json(UsersEnvelope { users }))
}

async fn admin_chats(
    State(state): State<AppState>,
    params: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<AdminDump>, ServerError> {
    let user_id = query(params)?
        .user_id
        .ok_or_else(|| ServerError::Forbidden("Admin access required".into()))?;
    let dump = state
        .registry
        .read()
        .await
        .admin_dump(user_id, state.config.admin_message_limit)?;
    Ok(Json(dump))
}

async fn not_found() -> ServerError {
    ServerError::NotFound
}

/// Start the HTTP API server on the given address.
pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down");
        })
        .await?;

    Ok(())
}
