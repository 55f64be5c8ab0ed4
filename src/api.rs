use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    catalog_service::CatalogService,
    config::StudyConfig,
    errors::{ApiError, ErrorContext, StudyError},
    models::*,
    session::{CardOrder, SessionSnapshot, SessionSummary, StudySession},
};

// Import logging macros
use crate::{log_api_error, log_api_start, log_api_success, log_api_warn, log_session_event};

type ErrorResponse = (StatusCode, Json<ApiResponse<()>>);
type ApiResult<T> = Result<Json<ApiResponse<T>>, ErrorResponse>;

/// A study session together with the scope it was started on
pub struct LiveSession {
    pub class: String,
    pub topic: Option<String>,
    pub session: StudySession,
    pub touched_at: Instant,
}

impl LiveSession {
    fn new(class: String, topic: Option<String>, session: StudySession) -> Self {
        Self {
            class,
            topic,
            session,
            touched_at: Instant::now(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub catalog_service: CatalogService,
    pub sessions: Arc<Mutex<HashMap<Uuid, LiveSession>>>,
    pub study: StudyConfig,
}

impl AppState {
    pub fn new(catalog_service: CatalogService, study: StudyConfig) -> Self {
        Self {
            catalog_service,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            study,
        }
    }
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub class: String,
    pub topic: Option<String>,
    #[serde(flatten)]
    pub snapshot: SessionSnapshot,
}

#[derive(Serialize)]
pub struct MarkResponse {
    pub card_id: Uuid,
    pub result: CardResult,
    /// False when the result could not be written back to the card
    pub recorded: bool,
    pub session: SessionView,
}

fn failure(error: StudyError, context: ErrorContext) -> ErrorResponse {
    ApiError::from(error).to_response_with_context(context)
}

fn session_not_found(operation: &str, session_id: Uuid) -> ErrorResponse {
    ApiError::NotFound(format!("Study session '{}' not found", session_id))
        .to_response_with_context(
            ErrorContext::new(operation, "study_session").with_id(&session_id.to_string()),
        )
}

// Class endpoints

pub async fn list_classes(State(state): State<AppState>) -> ApiResult<Vec<ClassSummary>> {
    log_api_start!("list_classes");
    let classes = state.catalog_service.list_classes().await;
    log_api_success!("list_classes", count = classes.len(), "classes listed");
    Ok(Json(ApiResponse::success(classes)))
}

pub async fn create_class(
    State(state): State<AppState>,
    Json(request): Json<CreateClassRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ClassRecord>>), ErrorResponse> {
    log_api_start!("create_class", class = request.name);

    match state.catalog_service.create_class(&request.name).await {
        Ok(class) => {
            log_api_success!("create_class", class = class.name, "class created");
            Ok((StatusCode::CREATED, Json(ApiResponse::success(class))))
        }
        Err(e) => Err(failure(
            e,
            ErrorContext::new("create_class", "class").with_id(&request.name),
        )),
    }
}

pub async fn delete_class(
    State(state): State<AppState>,
    Path(class_name): Path<String>,
) -> ApiResult<ClassRecord> {
    log_api_start!("delete_class", class = class_name);

    match state.catalog_service.delete_class(&class_name).await {
        Ok(class) => {
            log_api_success!("delete_class", class = class_name, "class deleted with its topics");
            Ok(Json(ApiResponse::success(class)))
        }
        Err(e) => Err(failure(
            e,
            ErrorContext::new("delete_class", "class").with_id(&class_name),
        )),
    }
}

// Topic endpoints

pub async fn list_topics(
    State(state): State<AppState>,
    Path(class_name): Path<String>,
) -> ApiResult<Vec<TopicSummary>> {
    state
        .catalog_service
        .list_topics(&class_name)
        .await
        .map(|topics| Json(ApiResponse::success(topics)))
        .map_err(|e| failure(e, ErrorContext::new("list_topics", "class").with_id(&class_name)))
}

pub async fn create_topic(
    State(state): State<AppState>,
    Path(class_name): Path<String>,
    Json(request): Json<CreateTopicRequest>,
) -> Result<(StatusCode, Json<ApiResponse<TopicRecord>>), ErrorResponse> {
    log_api_start!("create_topic", class = class_name, topic = request.name);

    match state
        .catalog_service
        .create_topic(&class_name, &request.name)
        .await
    {
        Ok(topic) => {
            log_api_success!("create_topic", class = class_name, format!("topic '{}' created", topic.name));
            Ok((StatusCode::CREATED, Json(ApiResponse::success(topic))))
        }
        Err(e) => Err(failure(
            e,
            ErrorContext::new("create_topic", "topic")
                .with_id(&format!("{}/{}", class_name, request.name)),
        )),
    }
}

pub async fn delete_topic(
    State(state): State<AppState>,
    Path((class_name, topic_name)): Path<(String, String)>,
) -> ApiResult<TopicRecord> {
    log_api_start!("delete_topic", class = class_name, topic = topic_name);

    match state
        .catalog_service
        .delete_topic(&class_name, &topic_name)
        .await
    {
        Ok(topic) => {
            log_api_success!("delete_topic", class = class_name, format!("topic '{}' deleted", topic_name));
            Ok(Json(ApiResponse::success(topic)))
        }
        Err(e) => Err(failure(
            e,
            ErrorContext::new("delete_topic", "topic")
                .with_id(&format!("{}/{}", class_name, topic_name)),
        )),
    }
}

// Card endpoints

pub async fn list_cards(
    State(state): State<AppState>,
    Path((class_name, topic_name)): Path<(String, String)>,
) -> ApiResult<Vec<CardRecord>> {
    match state.catalog_service.list_cards(&class_name, &topic_name).await {
        Ok(cards) => {
            log_api_success!("list_cards", count = cards.len(), "cards listed");
            Ok(Json(ApiResponse::success(cards)))
        }
        Err(e) => Err(failure(
            e,
            ErrorContext::new("list_cards", "topic")
                .with_id(&format!("{}/{}", class_name, topic_name)),
        )),
    }
}

pub async fn create_card(
    State(state): State<AppState>,
    Path((class_name, topic_name)): Path<(String, String)>,
    Json(request): Json<CreateCardRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CardRecord>>), ErrorResponse> {
    log_api_start!("create_card", class = class_name, topic = topic_name);

    match state
        .catalog_service
        .create_card(&class_name, &topic_name, request)
        .await
    {
        Ok(card) => {
            log_api_success!("create_card", card_id = card.id, "card created");
            Ok((StatusCode::CREATED, Json(ApiResponse::success(card))))
        }
        Err(e) => Err(failure(
            e,
            ErrorContext::new("create_card", "card")
                .with_id(&format!("{}/{}", class_name, topic_name)),
        )),
    }
}

pub async fn get_card(
    State(state): State<AppState>,
    Path((class_name, topic_name, card_id)): Path<(String, String, Uuid)>,
) -> ApiResult<CardRecord> {
    log_api_start!("get_card", card_id = card_id);

    match state
        .catalog_service
        .get_card(&class_name, &topic_name, card_id)
        .await
    {
        Ok(card) => Ok(Json(ApiResponse::success(card))),
        Err(e) => Err(failure(
            e,
            ErrorContext::new("get_card", "card").with_id(&card_id.to_string()),
        )),
    }
}

pub async fn update_card(
    State(state): State<AppState>,
    Path((class_name, topic_name, card_id)): Path<(String, String, Uuid)>,
    Json(request): Json<UpdateCardRequest>,
) -> ApiResult<CardRecord> {
    log_api_start!("update_card", card_id = card_id);

    match state
        .catalog_service
        .update_card(&class_name, &topic_name, card_id, request)
        .await
    {
        Ok(card) => {
            log_api_success!("update_card", card_id = card_id, "card updated");
            Ok(Json(ApiResponse::success(card)))
        }
        Err(e) => Err(failure(
            e,
            ErrorContext::new("update_card", "card").with_id(&card_id.to_string()),
        )),
    }
}

pub async fn delete_card(
    State(state): State<AppState>,
    Path((class_name, topic_name, card_id)): Path<(String, String, Uuid)>,
) -> ApiResult<CardRecord> {
    log_api_start!("delete_card", card_id = card_id);

    match state
        .catalog_service
        .delete_card(&class_name, &topic_name, card_id)
        .await
    {
        Ok(card) => {
            log_api_success!("delete_card", card_id = card_id, "card deleted");
            Ok(Json(ApiResponse::success(card)))
        }
        Err(e) => Err(failure(
            e,
            ErrorContext::new("delete_card", "card").with_id(&card_id.to_string()),
        )),
    }
}

// Image endpoints

pub async fn import_image(
    State(state): State<AppState>,
    Json(request): Json<ImportImageRequest>,
) -> Result<(StatusCode, Json<ApiResponse<StoredImage>>), ErrorResponse> {
    log_api_start!("import_image");
    let source = PathBuf::from(&request.source_path);

    match state.catalog_service.import_image(&source).await {
        Ok(path) => {
            log_api_success!("import_image", format!("stored {}", path));
            Ok((StatusCode::CREATED, Json(ApiResponse::success(StoredImage { path }))))
        }
        Err(e) => Err(failure(
            e,
            ErrorContext::new("import_image", "image").with_id(&request.source_path),
        )),
    }
}

pub async fn paste_image(
    State(state): State<AppState>,
    Json(request): Json<PasteImageRequest>,
) -> Result<(StatusCode, Json<ApiResponse<StoredImage>>), ErrorResponse> {
    log_api_start!("paste_image");

    match state.catalog_service.paste_image(&request.data_url).await {
        Ok(path) => {
            log_api_success!("paste_image", format!("stored {}", path));
            Ok((StatusCode::CREATED, Json(ApiResponse::success(StoredImage { path }))))
        }
        Err(e) => Err(failure(e, ErrorContext::new("paste_image", "image"))),
    }
}

pub async fn get_image(
    State(state): State<AppState>,
    Path(image_path): Path<String>,
) -> Result<Response, ErrorResponse> {
    match state.catalog_service.read_image(&image_path).await {
        Ok(Some(image)) => {
            Ok(([(header::CONTENT_TYPE, image.mime_type)], image.bytes).into_response())
        }
        Ok(None) => Err(ApiError::NotFound(format!("Image '{}' not found", image_path))
            .to_response_with_context(
                ErrorContext::new("get_image", "image").with_id(&image_path),
            )),
        Err(e) => Err(failure(
            e,
            ErrorContext::new("get_image", "image").with_id(&image_path),
        )),
    }
}

// Study session endpoints

impl AppState {
    /// Drops sessions nobody has touched within the idle window
    fn evict_idle_sessions(&self, sessions: &mut HashMap<Uuid, LiveSession>) -> usize {
        let idle = self.study.session_idle();
        let before = sessions.len();
        sessions.retain(|_, live| live.touched_at.elapsed() < idle);
        before - sessions.len()
    }

    /// Hides image paths whose files are gone so the front end can show the
    /// card without a broken image
    async fn present(
        &self,
        session_id: Uuid,
        class: &str,
        topic: Option<&str>,
        mut snapshot: SessionSnapshot,
    ) -> SessionView {
        if let Some(current) = snapshot.current.as_mut() {
            current.image_path = self
                .catalog_service
                .available_image(current.image_path.as_deref())
                .await;
        }
        SessionView {
            session_id,
            class: class.to_string(),
            topic: topic.map(str::to_string),
            snapshot,
        }
    }

    /// Runs one transition on a live session and renders the result
    async fn transition(
        &self,
        operation: &str,
        session_id: Uuid,
        step: impl FnOnce(&mut StudySession) -> crate::errors::Result<SessionSnapshot>,
    ) -> ApiResult<SessionView> {
        log_api_start!(operation, session_id = session_id);

        let (class, topic, outcome) = {
            let mut sessions = self.sessions.lock().await;
            let Some(live) = sessions.get_mut(&session_id) else {
                return Err(session_not_found(operation, session_id));
            };
            live.touched_at = Instant::now();
            (live.class.clone(), live.topic.clone(), step(&mut live.session))
        };

        match outcome {
            Ok(snapshot) => {
                log_session_event!(
                    operation,
                    session_id = session_id,
                    position = snapshot.position,
                    total = snapshot.total
                );
                let view = self
                    .present(session_id, &class, topic.as_deref(), snapshot)
                    .await;
                Ok(Json(ApiResponse::success(view)))
            }
            Err(e) => Err(failure(
                e,
                ErrorContext::new(operation, "study_session").with_id(&session_id.to_string()),
            )),
        }
    }
}

pub async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SessionView>>), ErrorResponse> {
    log_api_start!("start_session", class = request.class);
    let context = || ErrorContext::new("start_session", "class").with_id(&request.class);

    let deck = state
        .catalog_service
        .study_deck(&request.class, request.topic.as_deref())
        .await
        .map_err(|e| failure(e, context()))?;

    let order = CardOrder::from_shuffle(request.shuffle.unwrap_or(state.study.shuffle));
    let mut session = StudySession::new();
    let snapshot = session.start(deck, order).map_err(|e| failure(e, context()))?;

    let session_id = Uuid::new_v4();
    {
        let mut sessions = state.sessions.lock().await;
        let evicted = state.evict_idle_sessions(&mut sessions);
        if evicted > 0 {
            log_session_event!("evicted", count = evicted, "idle sessions dropped");
        }
        sessions.insert(
            session_id,
            LiveSession::new(request.class.clone(), request.topic.clone(), session),
        );
    }
    log_session_event!(
        "started",
        session_id = session_id,
        format!("{} cards from '{}'", snapshot.total, request.class)
    );

    let view = state
        .present(session_id, &request.class, request.topic.as_deref(), snapshot)
        .await;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(view))))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<SessionView> {
    state
        .transition("get_session", session_id, |session| Ok(session.snapshot()))
        .await
}

pub async fn reveal_card(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<SessionView> {
    state
        .transition("reveal_card", session_id, StudySession::reveal)
        .await
}

pub async fn skip_card(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<SessionView> {
    state
        .transition("skip_card", session_id, StudySession::skip)
        .await
}

pub async fn restart_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<SessionView> {
    state
        .transition("restart_session", session_id, StudySession::restart)
        .await
}

pub async fn mark_card(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<MarkRequest>,
) -> ApiResult<MarkResponse> {
    log_api_start!("mark_card", session_id = session_id);

    let (class, topic, outcome) = {
        let mut sessions = state.sessions.lock().await;
        let Some(live) = sessions.get_mut(&session_id) else {
            return Err(session_not_found("mark_card", session_id));
        };
        live.touched_at = Instant::now();
        (
            live.class.clone(),
            live.topic.clone(),
            live.session.mark(request.correct),
        )
    };

    let marked = outcome.map_err(|e| {
        failure(
            e,
            ErrorContext::new("mark_card", "study_session").with_id(&session_id.to_string()),
        )
    })?;

    // The session has already moved on; a failed write-back only loses the card's last result
    let recorded = match state
        .catalog_service
        .record_result(&class, &marked.topic, marked.card_id, marked.result)
        .await
    {
        Ok(()) => true,
        Err(StudyError::NotFound(what)) => {
            log_api_warn!(
                "mark_card",
                card_id = marked.card_id,
                format!("{} not found, result not recorded", what)
            );
            false
        }
        Err(e) => {
            log_api_error!(
                "mark_card",
                session_id = session_id,
                error = e,
                "could not record result on card"
            );
            false
        }
    };

    log_session_event!(
        "marked",
        session_id = session_id,
        position = marked.snapshot.position,
        total = marked.snapshot.total
    );

    let session = state
        .present(session_id, &class, topic.as_deref(), marked.snapshot)
        .await;
    Ok(Json(ApiResponse::success(MarkResponse {
        card_id: marked.card_id,
        result: marked.result,
        recorded,
        session,
    })))
}

pub async fn session_summary(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<SessionSummary> {
    log_api_start!("session_summary", session_id = session_id);
    let mut sessions = state.sessions.lock().await;
    let Some(live) = sessions.get_mut(&session_id) else {
        return Err(session_not_found("session_summary", session_id));
    };
    live.touched_at = Instant::now();

    match live.session.summary() {
        Ok(summary) => {
            log_api_success!(
                "session_summary",
                session_id = session_id,
                format!("{}% ({} of {})", summary.score_percent, summary.correct, summary.total)
            );
            Ok(Json(ApiResponse::success(summary)))
        }
        Err(e) => Err(failure(
            e,
            ErrorContext::new("session_summary", "study_session").with_id(&session_id.to_string()),
        )),
    }
}

pub async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Uuid> {
    match state.sessions.lock().await.remove(&session_id) {
        Some(_) => {
            log_session_event!("ended", session_id = session_id, "session discarded");
            Ok(Json(ApiResponse::success(session_id)))
        }
        None => Err(session_not_found("end_session", session_id)),
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Class routes
        .route("/api/classes", get(list_classes).post(create_class))
        .route("/api/classes/:class", delete(delete_class))

        // Topic routes
        .route("/api/classes/:class/topics", get(list_topics).post(create_topic))
        .route("/api/classes/:class/topics/:topic", delete(delete_topic))

        // Card routes
        .route(
            "/api/classes/:class/topics/:topic/cards",
            get(list_cards).post(create_card),
        )
        .route(
            "/api/classes/:class/topics/:topic/cards/:id",
            get(get_card).put(update_card).delete(delete_card),
        )

        // Image routes
        .route("/api/images/import", post(import_image))
        .route("/api/images/paste", post(paste_image))
        .route("/api/files/*path", get(get_image))

        // Study session routes
        .route("/api/study/sessions", post(start_session))
        .route("/api/study/sessions/:id", get(get_session).delete(end_session))
        .route("/api/study/sessions/:id/reveal", post(reveal_card))
        .route("/api/study/sessions/:id/mark", post(mark_card))
        .route("/api/study/sessions/:id/skip", post(skip_card))
        .route("/api/study/sessions/:id/restart", post(restart_session))
        .route("/api/study/sessions/:id/summary", get(session_summary))

        .with_state(state)
}
