//! HTTP endpoints for authentication, event workflow, comments, and user
//! listing.

use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderValue, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Settings;
use crate::error::ApiError;
use crate::model::{self, next_id, Comment, Document, Event, Role, Status, User, UserPublic};
use crate::store::Store;
use crate::tls;

#[derive(Clone)]
struct AppState {
    store: Store,
    admin_code: String,
    authority_code: String,
}

/// Start the API server, over TLS when certificate paths are configured.
pub async fn serve(
    addr: SocketAddr,
    store: Store,
    settings: &Settings,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let state = Arc::new(AppState {
        store,
        admin_code: settings.admin_code.clone(),
        authority_code: settings.authority_code.clone(),
    });
    let app = router(state, settings)?;
    match &settings.tls {
        Some(tls_settings) => tls::serve(addr, app, tls_settings, shutdown).await,
        None => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!(%addr, "listening");
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(shutdown)
                .await?;
            Ok(())
        }
    }
}

fn router(state: Arc<AppState>, settings: &Settings) -> Result<Router> {
    let cors = cors_layer(settings.cors_origin.as_deref())?;
    Ok(Router::new()
        .route("/healthz", get(healthz))
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/users", get(list_users))
        .route("/events", post(create_event))
        .route("/events/approved", get(approved_events))
        .route("/events/pending", get(pending_events))
        .route("/events/assigned", get(assigned_events))
        .route("/events/:id/status", put(update_status))
        .route("/events/:id/complain", post(complain))
        .route("/events/:id/comments", get(list_comments).post(create_comment))
        .layer(DefaultBodyLimit::max(settings.body_limit))
        .layer(cors)
        .with_state(state))
}

/// One fixed origin when configured, otherwise any origin.
fn cors_layer(origin: Option<&str>) -> Result<CorsLayer> {
    let layer = match origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(
                origin
                    .parse::<HeaderValue>()
                    .context("invalid CORS origin")?,
            )
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::permissive(),
    };
    Ok(layer)
}

/// Response body for the `/healthz` endpoint.
#[derive(Serialize, Deserialize)]
struct Health {
    status: String,
}

async fn healthz() -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
    })
}

#[derive(Deserialize)]
struct LoginInput {
    email: Option<String>,
    password: Option<String>,
    #[serde(rename = "type")]
    role: Option<String>,
}

/// Exact match on email, password, and account type; no session is
/// issued, the client just gets the user record back.
async fn login(
    State(state): State<Arc<AppState>>,
    Json(input): Json<LoginInput>,
) -> Result<Json<UserPublic>, ApiError> {
    let doc = state.store.load().await?;
    let user = doc.users.iter().find(|u| {
        input.email.as_deref() == Some(u.email.as_str())
            && input.role.as_deref() == Some(u.role.as_str())
            && input
                .password
                .as_deref()
                .is_some_and(|p| model::verify_password(u, p))
    });
    match user {
        Some(user) => Ok(Json(UserPublic::from(user))),
        None => Err(ApiError::InvalidCredentials),
    }
}

#[derive(Deserialize)]
struct RegisterInput {
    name: Option<String>,
    email: Option<String>,
    password: Option<String>,
    #[serde(rename = "type")]
    role: Option<String>,
    code: Option<String>,
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(input): Json<RegisterInput>,
) -> Result<(StatusCode, Json<UserPublic>), ApiError> {
    let (Some(name), Some(email), Some(password)) = (input.name, input.email, input.password)
    else {
        return Err(ApiError::BadRequest("incomplete data".into()));
    };
    let role = input
        .role
        .as_deref()
        .and_then(Role::parse)
        .ok_or_else(|| ApiError::BadRequest("invalid user type".into()))?;
    let code = input.code;
    let admin_code = state.admin_code.clone();
    let authority_code = state.authority_code.clone();
    let created = state
        .store
        .update(move |doc| {
            // The email check runs first: a taken address is reported even
            // when the access code is also wrong.
            if doc.users.iter().any(|u| u.email == email) {
                return Err(ApiError::Conflict("email already in use".into()));
            }
            match role {
                Role::Admin if code.as_deref() != Some(admin_code.as_str()) => {
                    return Err(ApiError::Forbidden("invalid admin access code".into()));
                }
                Role::Authority if code.as_deref() != Some(authority_code.as_str()) => {
                    return Err(ApiError::Forbidden("invalid authority access code".into()));
                }
                _ => {}
            }
            let user = User {
                id: next_id(doc.users.iter().map(|u| u.id)),
                name,
                email,
                password,
                role,
            };
            doc.users.push(user.clone());
            Ok(user)
        })
        .await?;
    info!(id = created.id, role = created.role.as_str(), "registered user");
    Ok((StatusCode::CREATED, Json(UserPublic::from(&created))))
}

async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<UserPublic>>, ApiError> {
    let doc = state.store.load().await?;
    Ok(Json(doc.users.iter().map(UserPublic::from).collect()))
}

/// `{id, name}` creator annotation attached to feed events. The id is
/// omitted when the creator reference does not resolve.
#[derive(Serialize, Deserialize)]
struct CreatorInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    name: String,
}

fn creator_info(doc: &Document, id: u64) -> CreatorInfo {
    match doc.user(id) {
        Some(user) => CreatorInfo {
            id: Some(user.id),
            name: user.name.clone(),
        },
        None => CreatorInfo {
            id: None,
            name: "Unknown".to_string(),
        },
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotatedEvent {
    #[serde(flatten)]
    event: Event,
    creator: CreatorInfo,
    comment_count: usize,
}

/// Events visible to the public feed: approved or already resolved.
async fn approved_events(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AnnotatedEvent>>, ApiError> {
    let doc = state.store.load().await?;
    let events = doc
        .events
        .iter()
        .filter(|e| matches!(e.status, Status::Approved | Status::Resolved))
        .map(|e| AnnotatedEvent {
            creator: creator_info(&doc, e.creator_id),
            comment_count: doc.comments.iter().filter(|c| c.event_id == e.id).count(),
            event: e.clone(),
        })
        .collect();
    Ok(Json(events))
}

async fn pending_events(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let doc = state.store.load().await?;
    Ok(Json(
        doc.events
            .iter()
            .filter(|e| e.status == Status::Pending)
            .cloned()
            .collect(),
    ))
}

/// Same filter as the approved feed; there is no distinct assignment
/// concept, authorities just work off the approved list.
async fn assigned_events(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let doc = state.store.load().await?;
    Ok(Json(
        doc.events
            .iter()
            .filter(|e| matches!(e.status, Status::Approved | Status::Resolved))
            .cloned()
            .collect(),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateEventInput {
    creator_id: Option<u64>,
    title: Option<String>,
    description: Option<String>,
    address: Option<String>,
    image_urls: Option<Vec<String>>,
}

async fn create_event(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CreateEventInput>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    let (Some(creator_id), Some(title), Some(description), Some(address)) = (
        input.creator_id,
        input.title,
        input.description,
        input.address,
    ) else {
        return Err(ApiError::BadRequest("incomplete data".into()));
    };
    let created = state
        .store
        .update(move |doc| {
            let event = Event {
                id: next_id(doc.events.iter().map(|e| e.id)),
                creator_id,
                title,
                description,
                address,
                image_urls: input.image_urls.unwrap_or_default(),
                complaints: 0,
                status: Status::Pending,
            };
            doc.events.push(event.clone());
            Ok::<_, ApiError>(event)
        })
        .await?;
    info!(id = created.id, "created event");
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Deserialize)]
struct StatusInput {
    status: Option<String>,
}

/// Admins approve or deny, authorities resolve. Denied events are
/// retained and marked rather than removed from the document.
async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(input): Json<StatusInput>,
) -> Result<Json<Event>, ApiError> {
    let status = match input.status.as_deref() {
        Some("approved") => Status::Approved,
        Some("denied") => Status::Denied,
        Some("resolved") => Status::Resolved,
        _ => return Err(ApiError::BadRequest("invalid status".into())),
    };
    let updated = state
        .store
        .update(move |doc| {
            let event = doc
                .event_mut(id)
                .ok_or_else(|| ApiError::NotFound("event not found".into()))?;
            event.status = status;
            Ok::<_, ApiError>(event.clone())
        })
        .await?;
    info!(id, status = ?updated.status, "updated event status");
    Ok(Json(updated))
}

async fn complain(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Event>, ApiError> {
    let updated = state
        .store
        .update(move |doc| {
            let event = doc
                .event_mut(id)
                .ok_or_else(|| ApiError::NotFound("event not found".into()))?;
            event.complaints += 1;
            Ok::<_, ApiError>(event.clone())
        })
        .await?;
    Ok(Json(updated))
}

/// Nested author annotation on comments: the full public user record
/// when the reference resolves, a placeholder name otherwise.
#[derive(Serialize, Deserialize)]
struct AuthorInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    role: Option<Role>,
}

fn author_info(user: Option<&User>) -> AuthorInfo {
    match user {
        Some(user) => AuthorInfo {
            id: Some(user.id),
            name: user.name.clone(),
            email: Some(user.email.clone()),
            role: Some(user.role),
        },
        None => AuthorInfo {
            id: None,
            name: "Unknown".to_string(),
            email: None,
            role: None,
        },
    }
}

#[derive(Serialize, Deserialize)]
struct AnnotatedComment {
    #[serde(flatten)]
    comment: Comment,
    author: AuthorInfo,
}

async fn list_comments(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<u64>,
) -> Result<Json<Vec<AnnotatedComment>>, ApiError> {
    let doc = state.store.load().await?;
    let comments = doc
        .comments
        .iter()
        .filter(|c| c.event_id == event_id)
        .map(|c| AnnotatedComment {
            author: author_info(doc.user(c.author_id)),
            comment: c.clone(),
        })
        .collect();
    Ok(Json(comments))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCommentInput {
    author_id: Option<u64>,
    text: Option<String>,
}

async fn create_comment(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<u64>,
    Json(input): Json<CreateCommentInput>,
) -> Result<(StatusCode, Json<AnnotatedComment>), ApiError> {
    let (Some(author_id), Some(text)) = (input.author_id, input.text) else {
        return Err(ApiError::BadRequest("incomplete data".into()));
    };
    let (comment, author) = state
        .store
        .update(move |doc| {
            // Reject dangling author references before anything is written.
            let author = doc
                .user(author_id)
                .cloned()
                .ok_or_else(|| ApiError::NotFound("author not found".into()))?;
            let comment = Comment {
                id: next_id(doc.comments.iter().map(|c| c.id)),
                event_id,
                author_id,
                text,
                timestamp: Some(Utc::now().to_rfc3339()),
            };
            doc.comments.push(comment.clone());
            Ok::<_, ApiError>((comment, author))
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(AnnotatedComment {
            comment,
            author: author_info(Some(&author)),
        }),
    ))
}
