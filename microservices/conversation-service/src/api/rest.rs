//! REST API handlers

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use huddle_conversation::{
    AddOutcome, ContentType, ConversationError, ConversationSettings, ConversationStats,
    ConversationView,
    GroupSpec, InfoUpdate, MediaAttachment, MessageDraft, MessageStatus, MessageView,
    PreferencesUpdate, Priority, ReactionKind, ReadOutcome, ReadTarget, Role, SettingsUpdate,
};
use huddle_core::{Actor, HealthStatus, IdempotencyKey, ReadinessStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::error::{ApiError, ErrorBody};
use super::AppState;
use crate::handlers::{CreateGroupCommand, MarkReadCommand, SendMessageCommand, SendMessageResult};
use crate::infrastructure::JwtIdentityVerifier;

const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// Generic API response
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorBody>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }

    pub fn failure(error: ErrorBody) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            error: Some(error),
        })
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Caller identity taken from the bearer token
pub struct AuthenticatedActor(pub Actor);

impl FromRequestParts<AppState> for AuthenticatedActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(JwtIdentityVerifier::extract_token)
            .ok_or(ConversationError::Unauthorized)?;
        let actor = state.identity.verify_actor(token).await?;
        Ok(Self(actor))
    }
}

fn idempotency_key(headers: &HeaderMap) -> Option<IdempotencyKey> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(IdempotencyKey::new)
}

fn view(state: &AppState, actor: Actor, conversation: &huddle_conversation::Conversation) -> ApiResult<ConversationView> {
    Ok(ApiResponse::success(state.dispatcher.view_of(actor, conversation)?))
}

// Health

pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        healthy: true,
        service_id: "conversation-service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

pub async fn ready_check() -> Json<ReadinessStatus> {
    Json(ReadinessStatus {
        ready: true,
        dependencies: vec![],
    })
}

pub async fn metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.metrics.snapshot())
}

// Conversations

#[derive(Debug, Deserialize, Validate)]
pub struct CreateGroupRequest {
    #[validate(length(min = 1, max = 100))]
    pub title: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    #[validate(url)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<Uuid>,
    pub settings: Option<ConversationSettings>,
    /// Text the creator posts as the first message
    #[validate(length(min = 1, max = 5000))]
    pub initial_message: Option<String>,
}

pub async fn create_group(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ConversationView>>), ApiError> {
    req.validate()?;
    let conversation = state
        .dispatcher
        .create_group(CreateGroupCommand {
            creator: actor,
            spec: GroupSpec {
                title: req.title,
                description: req.description,
                avatar_url: req.avatar_url,
                member_ids: req.member_ids,
                settings: req.settings,
            },
            initial_message: req.initial_message.map(MessageDraft::text),
        })
        .await?;
    Ok((StatusCode::CREATED, view(&state, actor, &conversation)?))
}

#[derive(Debug, Deserialize)]
pub struct OpenDirectRequest {
    pub peer_id: Uuid,
}

pub async fn open_direct(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<OpenDirectRequest>,
) -> ApiResult<ConversationView> {
    let conversation = state.dispatcher.open_direct(actor, req.peer_id).await?;
    view(&state, actor, &conversation)
}

#[derive(Debug, Default, Deserialize)]
pub struct ListConversationsQuery {
    #[serde(default)]
    pub include_archived: bool,
}

pub async fn list_conversations(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(query): Query<ListConversationsQuery>,
) -> ApiResult<Vec<ConversationView>> {
    let views = state
        .dispatcher
        .list_conversations(actor, query.include_archived)
        .await?;
    Ok(ApiResponse::success(views))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> ApiResult<ConversationView> {
    Ok(ApiResponse::success(state.dispatcher.get_conversation(actor, id).await?))
}

pub async fn conversation_stats(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> ApiResult<ConversationStats> {
    Ok(ApiResponse::success(state.dispatcher.conversation_stats(actor, id).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateInfoRequest {
    #[validate(length(min = 1, max = 100))]
    pub title: Option<String>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub avatar_url: Option<String>,
}

pub async fn update_info(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateInfoRequest>,
) -> ApiResult<ConversationView> {
    req.validate()?;
    let update = InfoUpdate {
        title: req.title,
        description: req.description,
        avatar_url: req.avatar_url,
    };
    let conversation = state.dispatcher.update_info(actor, id, update).await?;
    view(&state, actor, &conversation)
}

pub async fn update_settings(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
    Json(update): Json<SettingsUpdate>,
) -> ApiResult<ConversationView> {
    let conversation = state.dispatcher.update_settings(actor, id, update).await?;
    view(&state, actor, &conversation)
}

pub async fn deactivate(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> ApiResult<ConversationView> {
    let conversation = state.dispatcher.deactivate(actor, id).await?;
    view(&state, actor, &conversation)
}

// Membership

#[derive(Debug, Deserialize, Validate)]
pub struct AddParticipantsRequest {
    #[validate(length(min = 1))]
    pub user_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct AddParticipantsResponse {
    pub added: Vec<Uuid>,
    pub rejoined: Vec<Uuid>,
    pub already_active: Vec<Uuid>,
    pub conversation: ConversationView,
}

pub async fn add_participants(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
    Json(req): Json<AddParticipantsRequest>,
) -> ApiResult<AddParticipantsResponse> {
    req.validate()?;
    let (outcomes, conversation) = state
        .dispatcher
        .add_participants(actor, id, req.user_ids)
        .await?;

    let pick = |wanted: AddOutcome| -> Vec<Uuid> {
        outcomes
            .iter()
            .filter(|(_, o)| *o == wanted)
            .map(|(user_id, _)| *user_id)
            .collect()
    };
    Ok(ApiResponse::success(AddParticipantsResponse {
        added: pick(AddOutcome::Added),
        rejoined: pick(AddOutcome::Rejoined),
        already_active: pick(AddOutcome::AlreadyActive),
        conversation: state.dispatcher.view_of(actor, &conversation)?,
    }))
}

pub async fn remove_participant(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<ConversationView> {
    let conversation = state.dispatcher.remove_participant(actor, id, user_id).await?;
    view(&state, actor, &conversation)
}

pub async fn join(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> ApiResult<ConversationView> {
    let (_, conversation) = state.dispatcher.join(actor, id).await?;
    view(&state, actor, &conversation)
}

pub async fn leave(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> ApiResult<ConversationView> {
    let conversation = state.dispatcher.leave(actor, id).await?;
    view(&state, actor, &conversation)
}

#[derive(Debug, Deserialize, Validate)]
pub struct EncryptionKeyRequest {
    /// `null` clears the key
    #[validate(length(max = 4096))]
    pub key: Option<String>,
}

pub async fn set_encryption_key(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
    Json(req): Json<EncryptionKeyRequest>,
) -> Result<StatusCode, ApiError> {
    req.validate()?;
    state.dispatcher.set_encryption_key(actor, id, req.key).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: String,
}

pub async fn change_role(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ChangeRoleRequest>,
) -> ApiResult<ConversationView> {
    let role = Role::parse(&req.role)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown role '{}'", req.role)))?;
    let conversation = state.dispatcher.change_role(actor, id, user_id, role).await?;
    view(&state, actor, &conversation)
}

#[derive(Debug, Deserialize)]
pub struct MuteRequest {
    pub muted: bool,
}

pub async fn set_muted(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<MuteRequest>,
) -> ApiResult<ConversationView> {
    let conversation = state
        .dispatcher
        .set_muted(actor, id, user_id, req.muted)
        .await?;
    view(&state, actor, &conversation)
}

#[derive(Debug, Deserialize)]
pub struct ArchiveRequest {
    pub archived: bool,
}

pub async fn set_archived(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
    Json(req): Json<ArchiveRequest>,
) -> ApiResult<ConversationView> {
    let conversation = state.dispatcher.set_archived(actor, id, req.archived).await?;
    view(&state, actor, &conversation)
}

#[derive(Debug, Deserialize, Validate)]
pub struct PreferencesRequest {
    #[validate(length(max = 100))]
    pub nickname: Option<String>,
    pub notifications_enabled: Option<bool>,
}

pub async fn update_preferences(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
    Json(req): Json<PreferencesRequest>,
) -> ApiResult<ConversationView> {
    req.validate()?;
    let update = PreferencesUpdate {
        nickname: req.nickname,
        notifications_enabled: req.notifications_enabled,
    };
    let conversation = state
        .dispatcher
        .update_preferences(actor, id, update)
        .await?;
    view(&state, actor, &conversation)
}

// Messages

#[derive(Debug, Deserialize, Validate)]
pub struct SendMessageRequest {
    #[serde(default)]
    #[validate(length(max = 5000))]
    pub content: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub media: Vec<MediaAttachment>,
    #[serde(default)]
    pub mentions: Vec<Uuid>,
    #[serde(default)]
    pub priority: Priority,
    pub reply_to: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SendMessageRequest {
    fn into_draft(self) -> MessageDraft {
        let mut draft = MessageDraft::text(self.content).with_mentions(self.mentions);
        draft.content_type = self.content_type;
        draft.media = self.media;
        draft.priority = self.priority;
        draft.reply_to = self.reply_to;
        draft.expires_at = self.expires_at;
        draft
    }
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub message: MessageView,
    pub replayed: bool,
}

fn sent(actor: Actor, result: SendMessageResult) -> (StatusCode, Json<ApiResponse<SendMessageResponse>>) {
    let status = if result.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    let body = ApiResponse::success(SendMessageResponse {
        message: result.message.view(actor.user_id, Utc::now()),
        replayed: result.replayed,
    });
    (status, body)
}

pub async fn send_message(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(conversation_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SendMessageResponse>>), ApiError> {
    req.validate()?;
    let result = state
        .dispatcher
        .send_message(SendMessageCommand {
            conversation_id,
            sender: actor,
            draft: req.into_draft(),
            idempotency_key: idempotency_key(&headers),
        })
        .await?;
    Ok(sent(actor, result))
}

pub async fn send_direct(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(recipient): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SendMessageResponse>>), ApiError> {
    req.validate()?;
    let result = state
        .dispatcher
        .send_direct(actor, recipient, req.into_draft(), idempotency_key(&headers))
        .await?;
    Ok(sent(actor, result))
}

#[derive(Debug, Deserialize)]
pub struct ForwardRequest {
    pub conversation_id: Uuid,
}

pub async fn forward_message(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(message_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<ForwardRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SendMessageResponse>>), ApiError> {
    let result = state
        .dispatcher
        .forward_message(actor, message_id, req.conversation_id, idempotency_key(&headers))
        .await?;
    Ok(sent(actor, result))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListMessagesQuery {
    pub before: Option<u64>,
    pub limit: Option<usize>,
}

pub async fn list_messages(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<ListMessagesQuery>,
) -> ApiResult<Vec<MessageView>> {
    let page = state
        .dispatcher
        .list_messages(actor, conversation_id, query.before, query.limit)
        .await?;
    Ok(ApiResponse::success(page))
}

#[derive(Debug, Deserialize, Validate)]
pub struct EditMessageRequest {
    #[validate(length(min = 1, max = 5000))]
    pub content: String,
}

pub async fn edit_message(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(message_id): Path<Uuid>,
    Json(req): Json<EditMessageRequest>,
) -> ApiResult<MessageView> {
    req.validate()?;
    let message = state
        .dispatcher
        .edit_message(actor, message_id, req.content)
        .await?;
    Ok(ApiResponse::success(message.view(actor.user_id, Utc::now())))
}

pub async fn delete_message(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(message_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.dispatcher.delete_message(actor, message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    /// `null` clears the caller's reaction
    pub reaction: Option<ReactionKind>,
}

pub async fn react_to_message(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(message_id): Path<Uuid>,
    Json(req): Json<ReactionRequest>,
) -> ApiResult<MessageView> {
    let message = state
        .dispatcher
        .react_to_message(actor, message_id, req.reaction)
        .await?;
    Ok(ApiResponse::success(message.view(actor.user_id, Utc::now())))
}

#[derive(Debug, Serialize)]
pub struct DeliveryResponse {
    pub status: MessageStatus,
}

pub async fn record_delivery(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(message_id): Path<Uuid>,
) -> ApiResult<DeliveryResponse> {
    let status = state.dispatcher.record_delivery(actor, message_id).await?;
    Ok(ApiResponse::success(DeliveryResponse { status }))
}

#[derive(Debug, Deserialize)]
pub struct PinRequest {
    pub message_id: Uuid,
}

pub async fn pin_message(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<Uuid>,
    Json(req): Json<PinRequest>,
) -> ApiResult<ConversationView> {
    let conversation = state.dispatcher.pin_message(actor, id, req.message_id).await?;
    view(&state, actor, &conversation)
}

pub async fn unpin_message(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path((id, message_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<ConversationView> {
    let conversation = state.dispatcher.unpin_message(actor, id, message_id).await?;
    view(&state, actor, &conversation)
}

// Read state and typing

pub async fn mark_read(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(conversation_id): Path<Uuid>,
    headers: HeaderMap,
    Json(target): Json<ReadTarget>,
) -> ApiResult<ReadOutcome> {
    let outcome = state
        .dispatcher
        .mark_read(MarkReadCommand {
            conversation_id,
            reader: actor,
            target,
            idempotency_key: idempotency_key(&headers),
        })
        .await?;
    Ok(ApiResponse::success(outcome))
}

#[derive(Debug, Serialize)]
pub struct UnreadResponse {
    pub unread_count: u64,
}

pub async fn unread_count(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<UnreadResponse> {
    let unread_count = state.dispatcher.unread_count(actor, conversation_id).await?;
    Ok(ApiResponse::success(UnreadResponse { unread_count }))
}

pub async fn total_unread(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
) -> ApiResult<UnreadResponse> {
    let unread_count = state.dispatcher.total_unread(actor).await?;
    Ok(ApiResponse::success(UnreadResponse { unread_count }))
}

#[derive(Debug, Deserialize)]
pub struct TypingRequest {
    pub is_typing: bool,
}

pub async fn set_typing(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<TypingRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .dispatcher
        .set_typing(actor, conversation_id, req.is_typing)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct TypersResponse {
    pub user_ids: Vec<Uuid>,
}

pub async fn active_typers(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<TypersResponse> {
    let user_ids = state.dispatcher.active_typers(actor, conversation_id).await?;
    Ok(ApiResponse::success(TypersResponse { user_ids }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_request_builds_draft() {
        let parent = Uuid::new_v4();
        let req: SendMessageRequest = serde_json::from_value(serde_json::json!({
            "content": "see thread",
            "reply_to": parent,
            "priority": "high",
        }))
        .unwrap();
        assert!(req.validate().is_ok());

        let draft = req.into_draft();
        assert_eq!(draft.content, "see thread");
        assert_eq!(draft.reply_to, Some(parent));
        assert_eq!(draft.priority, Priority::High);
        assert_eq!(draft.content_type, ContentType::Text);
    }

    #[test]
    fn test_oversized_title_fails_validation() {
        let req = CreateGroupRequest {
            title: "x".repeat(101),
            description: None,
            avatar_url: None,
            member_ids: vec![],
            settings: None,
            initial_message: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_initial_message_is_optional_but_not_empty() {
        let req: CreateGroupRequest = serde_json::from_value(serde_json::json!({
            "title": "Launch",
        }))
        .unwrap();
        assert!(req.initial_message.is_none());
        assert!(req.validate().is_ok());

        let req: CreateGroupRequest = serde_json::from_value(serde_json::json!({
            "title": "Launch",
            "initial_message": "",
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_encryption_key_request_accepts_null() {
        let req: EncryptionKeyRequest =
            serde_json::from_value(serde_json::json!({ "key": null })).unwrap();
        assert!(req.key.is_none());
        assert!(req.validate().is_ok());

        let req = EncryptionKeyRequest {
            key: Some("k".repeat(4097)),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_read_target_wire_format() {
        let id = Uuid::new_v4();
        let target: ReadTarget =
            serde_json::from_value(serde_json::json!({"mode": "through", "message_id": id}))
                .unwrap();
        assert_eq!(target, ReadTarget::Through(id));
        let all: ReadTarget = serde_json::from_value(serde_json::json!({"mode": "all"})).unwrap();
        assert_eq!(all, ReadTarget::All);
    }

    #[test]
    fn test_idempotency_header_is_optional() {
        let mut headers = HeaderMap::new();
        assert!(idempotency_key(&headers).is_none());
        headers.insert(IDEMPOTENCY_HEADER, "abc-123".parse().unwrap());
        assert_eq!(idempotency_key(&headers), Some(IdempotencyKey::new("abc-123")));
    }
}
