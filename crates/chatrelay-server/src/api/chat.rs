use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, extract::State, routing::post};
use chrono::Utc;
use futures::StreamExt;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

use chatrelay_core::error::{RelayError, UpstreamError};
use chatrelay_core::message::Turn;
use chatrelay_core::model::{StreamItem, TextStream, is_safety_reason};
use chatrelay_core::request_log::RequestLog;

use crate::emitter::{EmitterOptions, EventEmitter};
use crate::error::AppError;
use crate::extractors::CurrentUser;
use crate::state::AppState;
use crate::types::{ChatRequest, ChatResponse, DonePayload, StartPayload};

pub fn routes() -> Router<AppState> {
    Router::new().route("/chat", post(chat))
}

async fn chat(
    State(state): State<AppState>,
    user: CurrentUser,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let log = RequestLog::new();
    let request_id = log.request_id().to_string();

    let result = match payload {
        Ok(Json(req)) => handle_chat(state, user, req, log).await,
        Err(rejection) => Err(fail(log, rejection.into())),
    };
    let mut response = match result {
        Ok(response) => response,
        Err(err) => err.into_response(),
    };
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Validate the request and answer in the requested mode.
///
/// Owns `log` and flushes it on every path that finishes the request here;
/// the streaming path hands it to the relay task instead.
async fn handle_chat(
    state: AppState,
    user: CurrentUser,
    req: ChatRequest,
    mut log: RequestLog,
) -> Result<Response, AppError> {
    let Some(message) = req.message.filter(|m| !m.trim().is_empty()) else {
        return Err(fail(log, AppError::BadRequest("message is required".into())));
    };
    let conversation_id = req
        .conversation_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut turns = state.conversations.history(&conversation_id).await;
    turns.push(Turn::user(message));
    log.record(format!(
        "chat conversation={conversation_id} stream={} history={}",
        req.stream,
        turns.len() - 1
    ));

    let job = RelayJob {
        conversation_id,
        user_id: user.user_id,
        turns,
    };

    if req.stream {
        let options = EmitterOptions::from(state.config.as_ref());
        let (emitter, body) = EventEmitter::channel(options);
        tokio::spawn(relay(state, emitter, job, log));
        return Ok(body.into_response());
    }

    let reply = match state.model.generate(&job.turns).await {
        Ok(reply) => reply,
        Err(err) => return Err(fail(log, err.into())),
    };
    log.record(format!(
        "reply chars={} finish_reason={:?}",
        reply.text.chars().count(),
        reply.finish_reason
    ));

    job.commit(&state, &reply.text).await;
    log.flush();

    Ok(Json(ChatResponse {
        message: reply.text,
        conversation_id: job.conversation_id,
        timestamp: Utc::now(),
        user_id: job.user_id,
    })
    .into_response())
}

fn fail(mut log: RequestLog, err: AppError) -> AppError {
    log.record(format!("failed status={} error={}", err.status(), err.message()));
    log.flush();
    err
}

/// One conversation exchange being relayed.
pub struct RelayJob {
    pub conversation_id: String,
    pub user_id: String,
    /// Prior history followed by the new user turn.
    pub turns: Vec<Turn>,
}

impl RelayJob {
    /// Record the user turn and the model's reply in the conversation.
    async fn commit(&self, state: &AppState, reply: &str) {
        if let Some(user_turn) = self.turns.last() {
            state
                .conversations
                .append(&self.conversation_id, user_turn.clone())
                .await;
        }
        state
            .conversations
            .append(&self.conversation_id, Turn::model(reply))
            .await;
    }
}

enum RelayOutcome {
    Completed {
        text: String,
        finish_reason: Option<String>,
        fragments: usize,
    },
    Failed(String),
    Disconnected {
        fragments: usize,
    },
}

/// Drive one streaming exchange from upstream to the client.
pub async fn relay(state: AppState, mut emitter: EventEmitter, job: RelayJob, mut log: RequestLog) {
    if !emitter.open().await {
        log.record("client left before the stream opened");
        log.flush();
        return;
    }

    let mut upstream = match state.model.stream(&job.turns).await {
        Ok(upstream) => upstream,
        Err(err) => {
            let message = AppError::from(err).message();
            log.record(format!("upstream failed: {message}"));
            emitter.send_error(&message);
            emitter.close();
            log.flush();
            return;
        }
    };
    log.record("upstream connected");

    emitter.send_start(&StartPayload {
        conversation_id: &job.conversation_id,
        user_id: &job.user_id,
    });

    match pump(&mut emitter, &mut upstream, state.config.ping_interval).await {
        RelayOutcome::Completed {
            text,
            finish_reason,
            fragments,
        } => {
            log.record(format!("upstream finished fragments={fragments}"));
            job.commit(&state, &text).await;
            let done = DonePayload {
                conversation_id: &job.conversation_id,
                finish_reason: finish_reason.as_deref(),
                length: text.chars().count(),
            };
            emitter.send_done(Some(&done)).await;
        }
        RelayOutcome::Failed(message) => {
            log.record(format!("stream failed: {message}"));
            emitter.send_error(&message);
            emitter.close();
        }
        RelayOutcome::Disconnected { fragments } => {
            log.record(format!("client disconnected after {fragments} fragments"));
            emitter.close();
        }
    }
    log.flush();
}

/// Forward upstream items until the upstream ends, fails, or the client leaves.
async fn pump(
    emitter: &mut EventEmitter,
    upstream: &mut TextStream,
    ping_interval: Duration,
) -> RelayOutcome {
    let mut ping = ping_timer(ping_interval);
    let mut text = String::new();
    let mut finish_reason = None;
    let mut fragments = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            item = upstream.next() => item,
            _ = next_ping(&mut ping) => {
                if !emitter.send_ping() {
                    return RelayOutcome::Disconnected { fragments };
                }
                continue;
            }
        };

        match next {
            None if fragments == 0 => {
                let err = AppError::from(RelayError::from(UpstreamError::EmptyCandidate));
                return RelayOutcome::Failed(err.message());
            }
            None => {
                return RelayOutcome::Completed {
                    text,
                    finish_reason,
                    fragments,
                };
            }
            Some(Ok(StreamItem::Text(fragment))) => {
                if !emitter.send_fragment(&fragment, Some(fragments.to_string())) {
                    return RelayOutcome::Disconnected { fragments };
                }
                text.push_str(&fragment);
                fragments += 1;
            }
            Some(Ok(StreamItem::Finished(reason))) if is_safety_reason(&reason) => {
                let err = AppError::from(RelayError::from(UpstreamError::SafetyBlocked { reason }));
                return RelayOutcome::Failed(err.message());
            }
            Some(Ok(StreamItem::Finished(reason))) => finish_reason = Some(reason),
            Some(Err(err)) => return RelayOutcome::Failed(AppError::from(err).message()),
        }
    }
}

fn ping_timer(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(timer)
}

async fn next_ping(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
