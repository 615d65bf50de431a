/**
 * API HTTP - Routes REST du kernel Meshion
 *
 * RÔLE :
 * Expose la file d'actions et les deux collections aux clients de gestion :
 * - POST/GET/DELETE /api/actions, GET /api/actions/{id}
 * - GET/POST/DELETE /api/devices, GET /api/devices/{id}
 * - GET/DELETE /api/diagnostics, GET /api/diagnostics/{id}
 * - /node redirige vers l'item de ce border router, /health pour la sonde
 *
 * FONCTIONNEMENT :
 * - Accept: application/vnd.api+json -> enveloppe json:api, sinon JSON brut
 * - ?fields[<type>]=a,b,c filtre les attributs par type d'item
 * - POST /api/devices lance une découverte et attend sa fin (long-poll) :
 *   408 avec le résultat partiel si le budget expire
 * - les routes mutantes exigent l'en-tête x-api-key (MESHION_API_KEY),
 *   les lectures et la sonde /health restent ouvertes
 */

use crate::actions::{Engine, SubmitError};
use crate::collection::FieldsFilter;
use crate::config::DiagConf;
use crate::devices::DevicesCollection;
use crate::diagnostics::DiagnosticsCollection;
use crate::state::Shared;
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

const JSON_API_CONTENT_TYPE: &str = "application/vnd.api+json";

#[derive(Clone)]
pub struct AppState {
    pub engine: Shared<Engine>,
    pub devices: Shared<DevicesCollection>,
    pub diagnostics: Shared<DiagnosticsCollection>,
    pub diag_conf: DiagConf,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/api/actions",
            get(get_actions).post(post_actions).delete(delete_actions),
        )
        .route("/api/actions/{id}", get(get_action))
        .route(
            "/api/devices",
            get(get_devices).post(post_devices).delete(delete_devices),
        )
        .route("/api/devices/{id}", get(get_device))
        .route(
            "/api/diagnostics",
            get(get_diagnostics).delete(delete_diagnostics),
        )
        .route("/api/diagnostics/{id}", get(get_diagnostic))
        .route("/node", get(get_node))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

/// Les lectures et la sonde restent ouvertes, le reste exige la clé d'API
fn auth_exempt(path: &str, method: &Method) -> bool {
    path.starts_with("/health") || path.starts_with("/node") || *method == Method::GET
}

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    if auth_exempt(req.uri().path(), req.method()) {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("MESHION_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

fn wants_json_api(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |accept| accept.contains(JSON_API_CONTENT_TYPE))
}

/// Extrait les paramètres `fields[<type>]=...` de la query string
fn fields_filter(params: &HashMap<String, String>) -> FieldsFilter {
    let mut fields = FieldsFilter::new();
    for (key, value) in params {
        if let Some(type_name) = key.strip_prefix("fields[").and_then(|k| k.strip_suffix(']')) {
            fields.insert(type_name.to_string(), value.clone());
        }
    }
    fields
}

fn json_api_response(status: StatusCode, body: Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, JSON_API_CONTENT_TYPE)],
        body.to_string(),
    )
        .into_response()
}

fn plain_json_response(status: StatusCode, body: Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn error_body(status: StatusCode, title: &str) -> Value {
    json!({ "errors": [{ "status": status.as_u16().to_string(), "title": title }] })
}

// ------ /api/actions ------

async fn post_actions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let content_type_ok = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |ct| {
            ct.contains("application/json") || ct.contains(JSON_API_CONTENT_TYPE)
        });
    if !content_type_ok {
        return json_api_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            error_body(StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported media type"),
        );
    }

    let Ok(parsed) = serde_json::from_str::<Value>(&body) else {
        return json_api_response(
            StatusCode::BAD_REQUEST,
            error_body(StatusCode::BAD_REQUEST, "malformed JSON body"),
        );
    };

    let mut engine = state.engine.lock();
    let result = {
        let Engine { queue, ctx } = &mut *engine;
        queue.submit(&parsed, ctx)
    };

    match result {
        Ok(ids) => {
            // avance immédiatement les actions fraîchement soumises
            engine.tick();
            let Engine { queue, ctx } = &*engine;
            json_api_response(StatusCode::OK, queue.to_json_subset(&ids, &ctx.allow_list))
        }
        Err(e @ SubmitError::Invalid) | Err(e @ SubmitError::Overflow) => json_api_response(
            StatusCode::CONFLICT,
            error_body(StatusCode::CONFLICT, &e.to_string()),
        ),
    }
}

async fn get_actions(State(state): State<AppState>) -> Response {
    let engine = state.engine.lock();
    let Engine { queue, ctx } = &*engine;
    json_api_response(StatusCode::OK, queue.to_json_all(&ctx.allow_list))
}

async fn get_action(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(uuid) = Uuid::parse_str(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let engine = state.engine.lock();
    let Engine { queue, ctx } = &*engine;
    match queue.to_json_one(&uuid, &ctx.allow_list) {
        Some(body) => json_api_response(StatusCode::OK, body),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn delete_actions(State(state): State<AppState>) -> StatusCode {
    let mut engine = state.engine.lock();
    engine.queue.mark_all_for_delete();
    engine.tick();
    StatusCode::NO_CONTENT
}

// ------ /api/devices ------

async fn get_devices(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let fields = fields_filter(&params);
    let devices = state.devices.lock();
    if wants_json_api(&headers) {
        json_api_response(StatusCode::OK, devices.to_json_api(&fields))
    } else {
        plain_json_response(StatusCode::OK, devices.to_plain_json(&fields))
    }
}

async fn get_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let fields = fields_filter(&params);
    let devices = state.devices.lock();
    let body = if wants_json_api(&headers) {
        devices.to_json_api_item(&id, &fields)
    } else {
        devices.to_plain_json_item(&id, &fields)
    };
    match body {
        Some(body) if wants_json_api(&headers) => json_api_response(StatusCode::OK, body),
        Some(body) => plain_json_response(StatusCode::OK, body),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn delete_devices(State(state): State<AppState>) -> StatusCode {
    state.devices.lock().clear();
    StatusCode::NO_CONTENT
}

/// Lance une découverte du réseau et répond quand elle se termine.
/// Le budget expiré répond 408 avec ce qui a pu être collecté.
async fn post_devices(State(state): State<AppState>) -> Response {
    let (done_tx, done_rx) = oneshot::channel();
    let conf = state.diag_conf.clone();

    {
        let mut engine = state.engine.lock();
        if engine
            .ctx
            .collector
            .configure(conf.timeout_ms, conf.max_age_ms, conf.retries, Some(done_tx))
            .is_err()
        {
            return json_api_response(
                StatusCode::CONFLICT,
                error_body(
                    StatusCode::CONFLICT,
                    "another collection cycle is already running",
                ),
            );
        }
        if let Err(e) = engine.ctx.collector.start_discovery() {
            eprintln!("[http] discovery start failed: {}", e);
            return json_api_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "discovery start failed"),
            );
        }
        engine.tick();
    }

    // garde-fou au-delà du budget du collecteur, qui se périme de lui-même
    let budget = conf.timeout_ms.clamp(10_000, 100_000) + 2_000;
    let completed = match tokio::time::timeout(Duration::from_millis(budget), done_rx).await {
        Ok(Ok(outcome)) => outcome.completed,
        Ok(Err(_)) | Err(_) => false,
    };

    let body = state.devices.lock().to_json_api(&FieldsFilter::new());
    if completed {
        json_api_response(StatusCode::OK, body)
    } else {
        json_api_response(StatusCode::REQUEST_TIMEOUT, body)
    }
}

// ------ /api/diagnostics ------

async fn get_diagnostics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let fields = fields_filter(&params);
    let diagnostics = state.diagnostics.lock();
    if wants_json_api(&headers) {
        json_api_response(StatusCode::OK, diagnostics.to_json_api(&fields))
    } else {
        plain_json_response(StatusCode::OK, diagnostics.to_plain_json(&fields))
    }
}

async fn get_diagnostic(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let fields = fields_filter(&params);
    let diagnostics = state.diagnostics.lock();
    let body = if wants_json_api(&headers) {
        diagnostics.to_json_api_item(&id, &fields)
    } else {
        diagnostics.to_plain_json_item(&id, &fields)
    };
    match body {
        Some(body) if wants_json_api(&headers) => json_api_response(StatusCode::OK, body),
        Some(body) => plain_json_response(StatusCode::OK, body),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn delete_diagnostics(State(state): State<AppState>) -> StatusCode {
    state.diagnostics.lock().clear();
    StatusCode::NO_CONTENT
}

// ------ /node ------

/// Redirige vers l'item devices de ce border router quand il est connu
async fn get_node(State(state): State<AppState>) -> Response {
    let devices = state.devices.lock();
    let this_device = devices
        .iter()
        .find(|item| item.node.is_some())
        .map(|item| crate::collection::CollectionItem::item_id(item));

    match this_device {
        Some(id) => Redirect::temporary(&format!("/api/devices/{}", id)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_filter_extraction() {
        let mut params = HashMap::new();
        params.insert("fields[threadDevice]".to_string(), "role,eui64".to_string());
        params.insert("other".to_string(), "x".to_string());

        let fields = fields_filter(&params);
        assert_eq!(fields.get("threadDevice").unwrap(), "role,eui64");
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn test_auth_exemptions() {
        // sonde, redirection /node et lectures ouvertes
        assert!(auth_exempt("/health", &Method::GET));
        assert!(auth_exempt("/node", &Method::GET));
        assert!(auth_exempt("/api/devices", &Method::GET));
        assert!(auth_exempt("/api/actions", &Method::GET));
        // les routes mutantes passent par la clé d'API
        assert!(!auth_exempt("/api/actions", &Method::POST));
        assert!(!auth_exempt("/api/actions", &Method::DELETE));
        assert!(!auth_exempt("/api/devices", &Method::POST));
        assert!(!auth_exempt("/api/diagnostics", &Method::DELETE));
    }

    #[test]
    fn test_wants_json_api() {
        let mut headers = HeaderMap::new();
        assert!(!wants_json_api(&headers));
        headers.insert(header::ACCEPT, "application/json".parse().unwrap());
        assert!(!wants_json_api(&headers));
        headers.insert(
            header::ACCEPT,
            "application/vnd.api+json".parse().unwrap(),
        );
        assert!(wants_json_api(&headers));
    }
}
