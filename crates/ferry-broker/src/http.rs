// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! HTTP routes over the consumer registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode as HttpStatus},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use ferry_core::{
    ConsumerRegistry, MemoryLedger, OneshotReply, PullResponse, RequestContext, StatusCode,
    TopicId,
};
use ferry_proto::wire::encode_response;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const REQUEST_ID: &str = "x-request-id";
const SRC_PARTY: &str = "x-ferry-src-party";
const DES_PARTY: &str = "x-ferry-des-party";
const SESSION_ID: &str = "x-ferry-session";
const FRAME_CONTENT_TYPE: &str = "application/x-ferry-frame";

/// Shared state behind every route.
pub(crate) struct AppState {
    pub(crate) registry: Arc<ConsumerRegistry>,
    pub(crate) ledger: Arc<MemoryLedger>,
    pub(crate) max_payload_bytes: usize,
    next_request: AtomicU64,
}

impl AppState {
    pub(crate) fn new(
        registry: Arc<ConsumerRegistry>,
        ledger: Arc<MemoryLedger>,
        max_payload_bytes: usize,
    ) -> Self {
        Self {
            registry,
            ledger,
            max_payload_bytes,
            next_request: AtomicU64::new(1),
        }
    }

    fn next_seq(&self) -> u64 {
        self.next_request.fetch_add(1, Ordering::Relaxed)
    }

    /// Build the request context from headers, minting a request id if the
    /// client sent none.
    fn context(&self, topic: TopicId, headers: &HeaderMap, seq: u64) -> RequestContext {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        let request_id = header(REQUEST_ID).map_or_else(|| format!("req-{seq}"), str::to_owned);
        let mut ctx = RequestContext::new(request_id, topic);
        if let (Some(src), Some(des)) = (header(SRC_PARTY), header(DES_PARTY)) {
            ctx = ctx.with_parties(src, des);
        }
        if let Some(session) = header(SESSION_ID) {
            ctx = ctx.with_session(session);
        }
        ctx
    }
}

pub(crate) fn router(state: Arc<AppState>) -> Router {
    let limit = state.max_payload_bytes;
    Router::new()
        .route("/topics/{topic}/messages", post(append))
        .route("/topics/{topic}/pull", get(pull))
        .route("/topics/{topic}/ack", post(ack))
        .route("/topics/{topic}/pending", get(pending))
        .route("/topics/{topic}", delete(destroy))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct Appended {
    offset: i64,
    satisfied: usize,
}

async fn append(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
    body: Bytes,
) -> Result<Json<Appended>, (HttpStatus, String)> {
    if body.len() > state.max_payload_bytes {
        return Err((
            HttpStatus::PAYLOAD_TOO_LARGE,
            format!("message exceeds {} bytes", state.max_payload_bytes),
        ));
    }
    let topic = TopicId::from(topic);
    let offset = state.ledger.append(&topic, body);
    let satisfied = state
        .registry
        .notify_arrival(&topic)
        .map_or(0, |report| report.satisfied);
    debug!(%topic, offset, satisfied, "message appended");
    Ok(Json(Appended { offset, satisfied }))
}

#[derive(Debug, Default, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Format {
    #[default]
    Json,
    Frame,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PullParams {
    /// Explicit offset; absent or `<= 0` reads at the consumer's cursor.
    #[serde(default)]
    offset: i64,
    #[serde(default)]
    format: Format,
}

/// JSON rendering of a [`PullResponse`]; the payload travels hex-encoded.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct PullBody {
    code: StatusCode,
    message: String,
    payload: Option<String>,
    request_index: i64,
    logic_index_total: i64,
}

impl From<PullResponse> for PullBody {
    fn from(resp: PullResponse) -> Self {
        Self {
            code: resp.code,
            message: resp.message,
            payload: resp.payload.map(hex::encode),
            request_index: resp.request_index,
            logic_index_total: resp.logic_index_total,
        }
    }
}

fn http_status(code: StatusCode) -> HttpStatus {
    match code {
        StatusCode::Success => HttpStatus::OK,
        StatusCode::Timeout => HttpStatus::REQUEST_TIMEOUT,
        StatusCode::Cancelled => HttpStatus::GONE,
        StatusCode::ConsumeFailed => HttpStatus::INTERNAL_SERVER_ERROR,
    }
}

async fn pull(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
    Query(params): Query<PullParams>,
    headers: HeaderMap,
) -> Response {
    let topic = TopicId::from(topic);
    let seq = state.next_seq();
    let ctx = state.context(topic.clone(), &headers, seq);
    let consumer = state.registry.bind(&topic);
    let (reply, rx) = OneshotReply::pair();
    let admission = consumer.pull(ctx, reply, params.offset);
    debug!(%topic, offset = params.offset, ?admission, "pull admitted");

    // dropping this future (client gone) closes `rx`; the next pass discards the pull
    let Ok(resp) = rx.await else {
        warn!(%topic, "pull dropped without an answer");
        return (HttpStatus::SERVICE_UNAVAILABLE, "pull dropped").into_response();
    };
    if resp.code.is_terminal_error() {
        info!(%topic, code = resp.code.code(), message = %resp.message, "pull answered without data");
    }
    let status = http_status(resp.code);
    match params.format {
        Format::Json => (status, Json(PullBody::from(resp))).into_response(),
        Format::Frame => match encode_response(&resp, seq) {
            Ok(frame) => {
                (status, [(header::CONTENT_TYPE, FRAME_CONTENT_TYPE)], frame).into_response()
            }
            Err(err) => {
                warn!(%topic, %err, "failed to frame pull response");
                (HttpStatus::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
            }
        },
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct AckParams {
    /// Last offset the client has consumed.
    offset: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct Acked {
    cursor: i64,
    satisfied: usize,
}

/// Commit everything up to and including `offset`; cursor-relative pulls
/// continue from the next one.
async fn ack(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
    Query(params): Query<AckParams>,
) -> Result<Json<Acked>, (HttpStatus, String)> {
    if params.offset < 1 {
        return Err((
            HttpStatus::BAD_REQUEST,
            format!("offsets start at 1, got {}", params.offset),
        ));
    }
    let topic = TopicId::from(topic);
    let consumer = state.registry.bind(&topic);
    let cursor = consumer.advance_cursor(params.offset.saturating_add(1));
    // parked cursor-relative pulls now target the new cursor
    let satisfied = consumer.notify().map_or(0, |report| report.satisfied);
    debug!(%topic, offset = params.offset, cursor, satisfied, "offset acknowledged");
    Ok(Json(Acked { cursor, satisfied }))
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct Pending {
    pending: usize,
    cursor: Option<i64>,
}

async fn pending(State(state): State<Arc<AppState>>, Path(topic): Path<String>) -> Json<Pending> {
    let consumer = state.registry.get(&TopicId::from(topic));
    Json(Pending {
        pending: consumer.as_ref().map_or(0, |c| c.pending_count()),
        cursor: consumer.map(|c| c.commit_cursor()),
    })
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct Destroyed {
    cancelled: usize,
    dropped_messages: usize,
}

async fn destroy(State(state): State<Arc<AppState>>, Path(topic): Path<String>) -> Json<Destroyed> {
    let topic = TopicId::from(topic);
    let cancelled = state.registry.destroy_topic(&topic);
    let dropped_messages = state.ledger.remove_topic(&topic);
    info!(%topic, cancelled, dropped_messages, "topic destroyed");
    Json(Destroyed {
        cancelled,
        dropped_messages,
    })
}
