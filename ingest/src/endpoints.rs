use std::net::IpAddr;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_client_ip::InsecureClientIp;
use tracing::instrument;
use url::Url;
use uuid::Uuid;

use common_identity::{
    classify, hash, Fingerprint, IdentifyCase, RequestIdentity, Resolved,
};
use common_queue::EnqueueOptions;
use common_types::jobs::{
    CreateUserJob, DeviceJob, EventJob, JobPayload, MergeJob, SessionJob, UpdateUserJob,
};
use common_types::{uuid_v7, EventRow, Project, ProjectId, SessionRow, UserId};

use crate::api::{ApiError, ApiResponse};
use crate::bot;
use crate::payload::{
    IdentifyPayload, IdentityFields, LeavePayload, ProfilePayload, ResetPayload, TrackPayload,
    LINK_OUT, PAGE_VIEW,
};
use crate::prometheus::{report_dropped_request, report_event_received, report_identify};
use crate::router;

const CONSENT_HEADER: &str = "x-allow-cookies";

fn consent(headers: &HeaderMap, body: Option<bool>) -> bool {
    // Header wins; body is the fallback for beacon requests that cannot
    // set custom headers. Absent entirely means cookies are allowed.
    if let Some(value) = headers.get(CONSENT_HEADER).and_then(|v| v.to_str().ok()) {
        return !matches!(value.trim(), "0" | "false" | "no");
    }
    body.unwrap_or(true)
}

fn cookie_name(project_id: ProjectId) -> String {
    format!("uid_{project_id}")
}

fn cookie_user_id(headers: &HeaderMap, project_id: ProjectId) -> Option<UserId> {
    let name = cookie_name(project_id);
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;

    cookies.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        if key == name {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

fn identity_cookie(project_id: ProjectId, user: UserId, max_age: Duration) -> String {
    format!(
        "{}={user}; Max-Age={}; Path=/; SameSite=Lax",
        cookie_name(project_id),
        max_age.as_secs()
    )
}

fn expired_cookie(project_id: ProjectId) -> String {
    format!("{}=; Max-Age=0; Path=/; SameSite=Lax", cookie_name(project_id))
}

fn respond(body: ApiResponse, cookie: Option<String>) -> Response {
    let mut response = body.into_response();
    if let Some(cookie) = cookie {
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

fn user_agent(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok())
}

fn request_identity(
    headers: &HeaderMap,
    project_id: ProjectId,
    ip: &IpAddr,
    fields: &IdentityFields,
    allow_cookies: bool,
) -> RequestIdentity {
    RequestIdentity {
        cookie_id: cookie_user_id(headers, project_id),
        user_identifier: fields.user_id.clone(),
        remembered_identifier: fields.remembered_id.clone(),
        ip: ip.to_string(),
        user_agent: user_agent(headers).map(str::to_owned),
        allow_cookies,
    }
}

fn same_domain(project: &Project, href: &str) -> bool {
    let Some(domain) = project.domain.as_deref() else {
        return false;
    };
    let Ok(parsed) = Url::parse(href) else {
        return false;
    };

    parsed
        .host_str()
        .is_some_and(|host| host == domain || host.ends_with(&format!(".{domain}")))
}

async fn enqueue(
    state: &router::State,
    payload: JobPayload,
    delay: Option<Duration>,
) -> Result<(), ApiError> {
    let options = EnqueueOptions {
        delay,
        dedup_key: payload.dedup_key(),
    };
    let value = serde_json::to_value(&payload)?;
    state.queue.enqueue(payload.queue(), value, options).await?;

    Ok(())
}

/// Resolve the request to a user, minting a random id when the resolver
/// defers to the cookie path. The flag says whether a cookie must be set.
async fn resolve_user(
    state: &router::State,
    project_id: ProjectId,
    req: &RequestIdentity,
) -> Result<(UserId, bool), ApiError> {
    match state.resolver.resolve(project_id, req, false).await? {
        Resolved::User(user) => Ok((user, false)),
        Resolved::Deferred => Ok((UserId::random(), true)),
    }
}

#[instrument(skip(state, headers, payload), fields(event = %payload.name))]
pub async fn track(
    State(state): State<router::State>,
    ip: InsecureClientIp,
    headers: HeaderMap,
    Json(payload): Json<TrackPayload>,
) -> Result<Response, ApiError> {
    if bot::is_bot(&headers, user_agent(&headers)) {
        report_dropped_request("bot");
        return Ok(respond(ApiResponse::ok(), None));
    }
    if payload.name.trim().is_empty() {
        return Err(ApiError::MissingEventName);
    }

    let project = state
        .app
        .project_by_token(&payload.token)
        .await?
        .ok_or(ApiError::InvalidToken)?;

    if project.ip_excluded(&ip.0.to_string()) {
        report_dropped_request("excluded_ip");
        return Ok(respond(ApiResponse::ok(), None));
    }

    match payload.name.as_str() {
        PAGE_VIEW => {
            if payload.url.is_none() {
                return Err(ApiError::MissingUrl);
            }
        }
        LINK_OUT => {
            if payload.url.is_none() {
                return Err(ApiError::MissingLinkUrl);
            }
            let Some(href) = payload.href.as_deref() else {
                return Err(ApiError::MissingHref);
            };
            // Same-site navigation misclassified as outbound by the SDK.
            if same_domain(&project, href) {
                report_dropped_request("same_domain_link");
                return Ok(respond(ApiResponse::ok(), None));
            }
        }
        _ => {}
    }

    let allow_cookies = consent(&headers, payload.identity.allow_cookies);
    let req = request_identity(&headers, project.id, &ip.0, &payload.identity, allow_cookies);
    let (user, minted) = resolve_user(&state, project.id, &req).await?;

    let now = state.clock.now();
    let touch = state.window.touch(project.id, user).await?;

    let identifier = state
        .app
        .mapping_by_user(project.id, user)
        .await?
        .map(|m| m.identifier);

    let device_id = req
        .user_agent
        .as_deref()
        .map(|ua| hash::device_id(project.id, user, &Fingerprint::parse(ua).signature()))
        .unwrap_or_default();

    let mut attributes = payload.attributes.clone();
    for (key, value) in [
        ("url", &payload.url),
        ("href", &payload.href),
        ("referrer", &payload.referrer),
        ("utm_source", &payload.utm_source),
        ("utm_medium", &payload.utm_medium),
        ("utm_campaign", &payload.utm_campaign),
    ] {
        if let Some(value) = value {
            attributes.insert(key.to_string(), serde_json::Value::String(value.clone()));
        }
    }

    let event = EventRow {
        id: payload.id.unwrap_or_else(uuid_v7),
        project_id: project.id,
        user_id: user,
        session_id: touch.session_id(),
        device_id,
        name: payload.name.clone(),
        created_at: now,
        identifier: identifier.clone(),
        display_name: payload.display_name.clone(),
        attributes,
    };

    // Fire-and-forget: durability starts at the queue, the response never
    // waits on the pipeline.
    if let Some(ua) = req.user_agent.clone() {
        enqueue(
            &state,
            JobPayload::Device(DeviceJob {
                project_id: project.id,
                user_id: user,
                user_agent: ua,
                created_at: now,
            }),
            None,
        )
        .await?;
    }

    let session_job = match touch {
        common_identity::Touch::Started(session_id) => SessionJob::Start {
            session: SessionRow {
                id: session_id,
                project_id: project.id,
                user_id: user,
                started_at: now,
                ended_at: now,
                duration_secs: 0,
                identifier,
                display_name: payload.display_name.clone(),
                referrer: payload.referrer.clone(),
                utm_source: payload.utm_source.clone(),
                utm_medium: payload.utm_medium.clone(),
                utm_campaign: payload.utm_campaign.clone(),
            },
        },
        common_identity::Touch::Extended(session_id) => SessionJob::Extend {
            project_id: project.id,
            session_id,
            at: now,
        },
    };
    enqueue(&state, JobPayload::Session(session_job), None).await?;

    enqueue(&state, JobPayload::Event(EventJob { event }), None).await?;

    if !payload.set.is_empty() || payload.display_name.is_some() {
        enqueue(
            &state,
            JobPayload::UpdateUser(UpdateUserJob {
                project_id: project.id,
                user_id: user,
                display_name: payload.display_name.clone(),
                attributes: payload.set.clone(),
            }),
            Some(state.update_user_delay),
        )
        .await?;
    }

    report_event_received();

    let cookie =
        (allow_cookies && minted).then(|| identity_cookie(project.id, user, state.cookie_max_age));
    Ok(respond(ApiResponse::for_user(user), cookie))
}

#[instrument(skip(state, headers, payload), fields(identifier = %payload.identifier))]
pub async fn identify(
    State(state): State<router::State>,
    ip: InsecureClientIp,
    headers: HeaderMap,
    Json(payload): Json<IdentifyPayload>,
) -> Result<Response, ApiError> {
    if bot::is_bot(&headers, user_agent(&headers)) {
        report_dropped_request("bot");
        return Ok(respond(ApiResponse::ok(), None));
    }

    let identifier = payload.identifier.trim().to_owned();
    if identifier.is_empty() {
        return Err(ApiError::MissingIdentifier);
    }

    let project = state
        .app
        .project_by_token(&payload.token)
        .await?
        .ok_or(ApiError::InvalidToken)?;

    if project.ip_excluded(&ip.0.to_string()) {
        report_dropped_request("excluded_ip");
        return Ok(respond(ApiResponse::ok(), None));
    }

    // Single flight per (project, identifier): a concurrent identify for
    // the same identifier is a conflict, not a queue.
    let Some(guard) = state.lock.acquire(project.id, &identifier).await? else {
        report_identify("conflict");
        return Err(ApiError::IdentifyInProgress);
    };

    let result = run_identify(&state, &project, &headers, &ip.0, &identifier, payload).await;
    guard.release().await;

    result
}

async fn run_identify(
    state: &router::State,
    project: &Project,
    headers: &HeaderMap,
    ip: &IpAddr,
    identifier: &str,
    payload: IdentifyPayload,
) -> Result<Response, ApiError> {
    let allow_cookies = consent(headers, payload.identity.allow_cookies);
    let req = request_identity(headers, project.id, ip, &payload.identity, allow_cookies);

    // The remembered-identifier shortcut is deliberately ignored here so a
    // real merge decision gets made against this request's anonymous id.
    let current = match state.resolver.resolve(project.id, &req, true).await {
        Ok(Resolved::User(user)) => Some(user),
        Ok(Resolved::Deferred) => None,
        Err(err) => return Err(err.into()),
    };

    let mapping_for_user = match current {
        Some(user) => state.app.mapping_by_user(project.id, user).await?,
        None => None,
    };
    let mapping_for_identifier = state
        .app
        .mapping_by_identifier(project.id, identifier)
        .await?;

    let case = match classify(
        identifier,
        current,
        mapping_for_user.as_ref(),
        mapping_for_identifier.as_ref(),
    ) {
        // The current user belongs to a different identifier; leave that
        // lineage alone and decide again as if anonymous.
        IdentifyCase::IdentifiedOther => {
            classify(identifier, None, None, mapping_for_identifier.as_ref())
        }
        case => case,
    };

    let user = match case {
        IdentifyCase::IdentifiedSame { user } => {
            report_identify("already_identified");
            enqueue(
                state,
                JobPayload::UpdateUser(UpdateUserJob {
                    project_id: project.id,
                    user_id: user,
                    display_name: payload.display_name.clone(),
                    attributes: payload.set.clone(),
                }),
                None,
            )
            .await?;
            user
        }

        IdentifyCase::NeverSeen { user } => {
            let user = user.unwrap_or_else(UserId::random);
            state
                .app
                .create_mapping(&common_types::IdentityMapping {
                    project_id: project.id,
                    user_id: user,
                    identifier: identifier.to_owned(),
                    created_at: state.clock.now(),
                })
                .await?;
            report_identify("first_identify");
            enqueue(
                state,
                JobPayload::CreateUser(CreateUserJob {
                    project_id: project.id,
                    user_id: user,
                    identifier: identifier.to_owned(),
                    display_name: payload.display_name.clone(),
                    attributes: payload.set.clone(),
                }),
                None,
            )
            .await?;
            user
        }

        IdentifyCase::KnownIdentifier { canonical, orphan } => {
            enqueue(
                state,
                JobPayload::UpdateUser(UpdateUserJob {
                    project_id: project.id,
                    user_id: canonical,
                    display_name: payload.display_name.clone(),
                    attributes: payload.set.clone(),
                }),
                None,
            )
            .await?;

            if let Some(orphan) = orphan {
                report_identify("merge");
                // Delayed so the update above lands first, deduplicated so
                // retried triggers collapse into one queued merge.
                enqueue(
                    state,
                    JobPayload::MergeUsers(MergeJob {
                        project_id: project.id,
                        from_user_id: orphan,
                        into_user_id: canonical,
                    }),
                    Some(state.merge_delay),
                )
                .await?;
            } else {
                report_identify("re_identify");
            }
            canonical
        }

        // A classification without a current user can only be NeverSeen or
        // KnownIdentifier.
        IdentifyCase::IdentifiedOther => unreachable!("reclassified without a current user"),
    };

    let cookie =
        allow_cookies.then(|| identity_cookie(project.id, user, state.cookie_max_age));
    Ok(respond(ApiResponse::for_user(user), cookie))
}

#[instrument(skip(state, headers, payload))]
pub async fn profile(
    State(state): State<router::State>,
    ip: InsecureClientIp,
    headers: HeaderMap,
    Json(payload): Json<ProfilePayload>,
) -> Result<Response, ApiError> {
    if bot::is_bot(&headers, user_agent(&headers)) {
        report_dropped_request("bot");
        return Ok(respond(ApiResponse::ok(), None));
    }

    let project = state
        .app
        .project_by_token(&payload.token)
        .await?
        .ok_or(ApiError::InvalidToken)?;

    if project.ip_excluded(&ip.0.to_string()) {
        report_dropped_request("excluded_ip");
        return Ok(respond(ApiResponse::ok(), None));
    }

    let allow_cookies = consent(&headers, payload.identity.allow_cookies);
    let req = request_identity(&headers, project.id, &ip.0, &payload.identity, allow_cookies);
    let (user, minted) = resolve_user(&state, project.id, &req).await?;

    enqueue(
        &state,
        JobPayload::UpdateUser(UpdateUserJob {
            project_id: project.id,
            user_id: user,
            display_name: payload.display_name.clone(),
            attributes: payload.set.clone(),
        }),
        None,
    )
    .await?;

    let cookie =
        (allow_cookies && minted).then(|| identity_cookie(project.id, user, state.cookie_max_age));
    Ok(respond(ApiResponse::for_user(user), cookie))
}

#[instrument(skip(state, headers, payload))]
pub async fn leave(
    State(state): State<router::State>,
    ip: InsecureClientIp,
    headers: HeaderMap,
    Json(payload): Json<LeavePayload>,
) -> Result<Response, ApiError> {
    if bot::is_bot(&headers, user_agent(&headers)) {
        report_dropped_request("bot");
        return Ok(respond(ApiResponse::ok(), None));
    }

    let project = state
        .app
        .project_by_token(&payload.token)
        .await?
        .ok_or(ApiError::InvalidToken)?;

    if project.ip_excluded(&ip.0.to_string()) {
        report_dropped_request("excluded_ip");
        return Ok(respond(ApiResponse::ok(), None));
    }

    let allow_cookies = consent(&headers, payload.identity.allow_cookies);
    let req = request_identity(&headers, project.id, &ip.0, &payload.identity, allow_cookies);

    // A leave stamps the open session at the leave time without refreshing
    // the window: leaving is not activity.
    if let Resolved::User(user) = state.resolver.resolve(project.id, &req, false).await? {
        if let Some(session_id) = state.window.open_session(project.id, user).await? {
            enqueue(
                &state,
                JobPayload::Session(SessionJob::Extend {
                    project_id: project.id,
                    session_id,
                    at: state.clock.now(),
                }),
                None,
            )
            .await?;
        }
    }

    Ok(respond(ApiResponse::ok(), None))
}

#[instrument(skip(state, headers, payload))]
pub async fn reset(
    State(state): State<router::State>,
    ip: InsecureClientIp,
    headers: HeaderMap,
    Json(payload): Json<ResetPayload>,
) -> Result<Response, ApiError> {
    let project = state
        .app
        .project_by_token(&payload.token)
        .await?
        .ok_or(ApiError::InvalidToken)?;

    let allow_cookies = consent(&headers, payload.identity.allow_cookies);
    let req = request_identity(&headers, project.id, &ip.0, &payload.identity, allow_cookies);

    if let Resolved::User(user) = state.resolver.resolve(project.id, &req, false).await? {
        state.window.clear(project.id, user).await?;
    }

    Ok(respond(ApiResponse::ok(), Some(expired_cookie(project.id))))
}
