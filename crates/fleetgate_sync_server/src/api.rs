//! Governance and inventory API.
//!
//! Every `/api` route takes a bearer token; finalizing proposals and
//! managing rules also need the admin role.

use crate::auth::{bearer_token, Claims};
use crate::error::{ServerError, ServerResult};
use crate::server::{blocking, AppState};
use axum::body::Bytes;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use fleetgate_core::{EventFilter, NewProposal, NewRule, Proposal, ProposalStatus, RuleFilter};
use fleetgate_protocol::{Policy, RuleType, VoteType};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[axum::async_trait]
impl FromRequestParts<AppState> for Claims {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ServerError::AuthenticationFailed("missing bearer token".into()))?
            .to_string();
        let auth = state.auth.clone();
        blocking(move || auth.verify(&token, Utc::now())).await
    }
}

fn require_admin(claims: &Claims) -> ServerResult<()> {
    if claims.is_admin() {
        Ok(())
    } else {
        Err(ServerError::NotAuthorized("admin role required".into()))
    }
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> ServerResult<T> {
    serde_json::from_slice(body).map_err(|e| ServerError::InvalidRequest(e.to_string()))
}

fn parse_tag<T: std::str::FromStr>(value: Option<&str>) -> ServerResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    value
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.parse().map_err(|e: T::Err| ServerError::InvalidRequest(e.to_string())))
        .transpose()
}

fn non_empty(field: &str, value: String) -> ServerResult<String> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(ServerError::InvalidRequest(format!("{field} is required")));
    }
    Ok(value)
}

/// Routes mounted under `/api`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/proposals", get(list_proposals).post(create_proposal))
        .route("/proposals/:id", get(get_proposal).delete(delete_proposal))
        .route("/proposals/:id/vote", post(vote))
        .route("/proposals/:id/approve", post(approve))
        .route("/rules", get(list_rules).post(create_rule))
        .route("/rules/:id", get(get_rule).delete(delete_rule))
        .route("/machines", get(list_machines))
        .route("/machines/:id", get(get_machine))
        .route("/events", get(list_events))
}

#[derive(Deserialize)]
struct CreateProposalBody {
    identifier: String,
    rule_type: RuleType,
    #[serde(alias = "policy")]
    proposed_policy: Policy,
    #[serde(default)]
    custom_message: Option<String>,
}

async fn create_proposal(
    State(state): State<AppState>,
    claims: Claims,
    body: Bytes,
) -> ServerResult<Response> {
    let body: CreateProposalBody = parse_json(&body)?;
    let proposal = NewProposal {
        identifier: non_empty("identifier", body.identifier)?,
        rule_type: body.rule_type,
        proposed_policy: body.proposed_policy,
        custom_message: body.custom_message.filter(|m| !m.trim().is_empty()),
        created_by: claims.sub,
    };
    let db = state.db.clone();
    let id = blocking(move || Ok(db.create_proposal(&proposal)?)).await?;
    tracing::info!(proposal_id = id, user_id = claims.sub, "proposal created");
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))).into_response())
}

#[derive(Deserialize)]
struct ListProposalsQuery {
    status: Option<String>,
}

async fn list_proposals(
    State(state): State<AppState>,
    _claims: Claims,
    Query(query): Query<ListProposalsQuery>,
) -> ServerResult<Json<Vec<Proposal>>> {
    let status: Option<ProposalStatus> = parse_tag(query.status.as_deref())?;
    let db = state.db.clone();
    Ok(Json(blocking(move || Ok(db.list_proposals(status)?)).await?))
}

#[derive(Serialize)]
struct ProposalView {
    #[serde(flatten)]
    proposal: Proposal,
    my_vote: Option<VoteType>,
}

async fn get_proposal(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i64>,
) -> ServerResult<Json<ProposalView>> {
    let db = state.db.clone();
    let view = blocking(move || {
        Ok(ProposalView {
            proposal: db.get_proposal(id)?,
            my_vote: db.vote_of(claims.sub, id)?.map(|v| v.vote_type),
        })
    })
    .await?;
    Ok(Json(view))
}

async fn delete_proposal(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i64>,
) -> ServerResult<StatusCode> {
    let db = state.db.clone();
    blocking(move || {
        let proposal = db.get_proposal(id)?;
        if proposal.created_by != claims.sub && !claims.is_admin() {
            return Err(ServerError::NotAuthorized(
                "only the creator or an admin can delete a proposal".into(),
            ));
        }
        db.delete_proposal(id)?;
        tracing::info!(proposal_id = id, user_id = claims.sub, "proposal deleted");
        Ok(StatusCode::NO_CONTENT)
    })
    .await
}

#[derive(Deserialize)]
struct VoteBody {
    #[serde(alias = "vote")]
    vote_type: String,
}

async fn vote(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i64>,
    body: Bytes,
) -> ServerResult<Response> {
    let body: VoteBody = parse_json(&body)?;
    let governance = state.governance.clone();
    let receipt =
        blocking(move || Ok(governance.submit_vote(claims.sub, id, &body.vote_type)?)).await?;
    Ok(Json(receipt).into_response())
}

#[derive(Deserialize)]
struct ApproveBody {
    policy: String,
}

async fn approve(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i64>,
    body: Bytes,
) -> ServerResult<Response> {
    require_admin(&claims)?;
    let body: ApproveBody = parse_json(&body)?;
    let policy: Policy = parse_tag(Some(body.policy.as_str()))?
        .ok_or_else(|| ServerError::InvalidRequest("policy is required".into()))?;
    let governance = state.governance.clone();
    let outcome = blocking(move || Ok(governance.finalize(id, policy)?)).await?;
    tracing::info!(
        proposal_id = id,
        admin = claims.sub,
        policy = policy.as_str(),
        ?outcome,
        "administrative override"
    );
    Ok(Json(outcome).into_response())
}

#[derive(Deserialize)]
struct ListRulesQuery {
    policy: Option<String>,
    rule_type: Option<String>,
}

async fn list_rules(
    State(state): State<AppState>,
    _claims: Claims,
    Query(query): Query<ListRulesQuery>,
) -> ServerResult<Response> {
    let filter = RuleFilter {
        policy: parse_tag(query.policy.as_deref())?,
        rule_type: parse_tag(query.rule_type.as_deref())?,
    };
    let db = state.db.clone();
    let rules = blocking(move || Ok(db.list_rules(filter)?)).await?;
    Ok(Json(rules).into_response())
}

async fn get_rule(
    State(state): State<AppState>,
    _claims: Claims,
    Path(id): Path<i64>,
) -> ServerResult<Response> {
    let db = state.db.clone();
    let rule = blocking(move || Ok(db.get_rule(id)?)).await?;
    Ok(Json(rule).into_response())
}

#[derive(Deserialize)]
struct CreateRuleBody {
    identifier: String,
    policy: Policy,
    rule_type: RuleType,
    #[serde(default, alias = "custom_message")]
    custom_msg: Option<String>,
    #[serde(default)]
    comment: Option<String>,
}

async fn create_rule(
    State(state): State<AppState>,
    claims: Claims,
    body: Bytes,
) -> ServerResult<Response> {
    require_admin(&claims)?;
    let body: CreateRuleBody = parse_json(&body)?;
    let identifier = non_empty("identifier", body.identifier)?;
    let mut rule =
        NewRule::manual(identifier, body.policy, body.rule_type).with_created_by(claims.sub);
    if let Some(msg) = body.custom_msg.filter(|m| !m.trim().is_empty()) {
        rule = rule.with_custom_msg(msg);
    }
    if let Some(comment) = body.comment.filter(|c| !c.trim().is_empty()) {
        rule = rule.with_comment(comment);
    }
    let db = state.db.clone();
    let id = blocking(move || Ok(db.create_rule(&rule)?)).await?;
    tracing::info!(rule_id = id, admin = claims.sub, "rule created");
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))).into_response())
}

async fn delete_rule(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i64>,
) -> ServerResult<StatusCode> {
    require_admin(&claims)?;
    let db = state.db.clone();
    blocking(move || Ok(db.delete_rule(id)?)).await?;
    tracing::info!(rule_id = id, admin = claims.sub, "rule deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_machines(State(state): State<AppState>, _claims: Claims) -> ServerResult<Response> {
    let db = state.db.clone();
    let devices = blocking(move || Ok(db.list_devices()?)).await?;
    Ok(Json(devices).into_response())
}

async fn get_machine(
    State(state): State<AppState>,
    _claims: Claims,
    Path(id): Path<String>,
) -> ServerResult<Response> {
    let db = state.db.clone();
    let device = blocking(move || Ok(db.get_device(&id)?)).await?;
    Ok(Json(device).into_response())
}

#[derive(Deserialize)]
struct ListEventsQuery {
    machine_id: Option<String>,
    decision: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

async fn list_events(
    State(state): State<AppState>,
    _claims: Claims,
    Query(query): Query<ListEventsQuery>,
) -> ServerResult<Response> {
    let filter = EventFilter {
        device_id: query.machine_id.filter(|m| !m.trim().is_empty()),
        decision: query.decision.filter(|d| !d.trim().is_empty()),
    };
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let db = state.db.clone();
    let events = blocking(move || Ok(db.list_events(&filter, page, limit)?)).await?;
    Ok(Json(events).into_response())
}

/// Public configuration for dashboards.
pub async fn public_config(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "vote_threshold": state.governance.config().threshold(),
        "client_mode": state.sync.policy().client_mode,
    }))
    .into_response()
}

/// Revokes the session behind the bearer token, if any.
///
/// Always succeeds: a missing, unknown or already revoked token leaves
/// nothing to do.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = bearer_token(&headers).map(str::to_string) else {
        return Json(serde_json::json!({ "message": "already logged out" })).into_response();
    };
    let db = state.db.clone();
    match blocking(move || Ok(db.revoke_session(&token)?)).await {
        Ok(revoked) => tracing::info!(revoked, "logout"),
        Err(e) => tracing::warn!(error = %e, "failed to revoke session"),
    }
    Json(serde_json::json!({ "message": "logged out" })).into_response()
}

/// Public health check.
pub async fn ping(State(state): State<AppState>) -> Response {
    let db = state.db.clone();
    let healthy = blocking(move || {
        Ok(db.read(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?))?)
    })
    .await
    .is_ok();

    let (status, body) = if healthy {
        (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "database": "connected",
                "timestamp": Utc::now().to_rfc3339(),
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({ "status": "unhealthy", "database": "disconnected" }),
        )
    };
    (status, Json(body)).into_response()
}
