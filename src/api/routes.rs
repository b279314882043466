use crate::api::model::{
    addrs_changed, flatten_params, join_ips, parse_ips, CertificateQuery, UpdateQuery,
    MAX_UPDATE_HOSTNAMES,
};
use crate::cert::cache::SYNC_DEADLINE;
use crate::cert::CertCache;
use crate::config::SharedConfig;
use crate::error::Error;
use crate::hostname;
use crate::store::{self, DynStore};
use axum::extract::State;
use axum::headers::authorization::Basic;
use axum::headers::Authorization;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router, TypedHeader};
use axum_extra::extract::Query;
use serde_json::json;
use std::sync::Arc;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub(super) struct AppState {
    config: SharedConfig,
    store: DynStore,
    certs: Arc<CertCache>,
}

pub fn router(config: SharedConfig, store: DynStore, certs: Arc<CertCache>) -> Router {
    let state = AppState {
        config,
        store,
        certs,
    };
    // The certificate endpoint may legitimately wait on a whole ACME order,
    // so it stays outside the request timeout that covers everything else.
    let quick = Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(health_check))
        .route("/v1/update", get(v1_update))
        .layer(TimeoutLayer::new(state.config.api.timeout));
    let slow = Router::new().route("/v1/certificate", get(v1_certificate));

    quick
        .merge(slow)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[allow(clippy::unused_async)]
async fn index() -> &'static str {
    "Hello, world! You should be now using HTTPS!\n"
}

#[allow(clippy::unused_async)]
async fn health_check() -> impl IntoResponse {
    Json(json!({"ok":"healthy"}))
}

fn authorized(state: &AppState, auth: &Option<TypedHeader<Authorization<Basic>>>) -> bool {
    match auth {
        Some(TypedHeader(Authorization(creds))) => {
            creds.username() == state.config.auth.username
                && creds.password() == state.config.auth.password
        }
        None => false,
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"dynward\"")],
        "unauthorized\n",
    )
        .into_response()
}

async fn v1_update(
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Basic>>>,
    Query(query): Query<UpdateQuery>,
) -> Response {
    if !authorized(&state, &auth) {
        return unauthorized();
    }
    apply_update(&state.store, &query).await.into_response()
}

/// Run one update request against the store, producing the dyndns-style
/// plaintext body (one line per hostname).
async fn apply_update(db: &DynStore, query: &UpdateQuery) -> String {
    let hostnames = flatten_params(&query.hostname);
    if hostnames.is_empty() {
        return "notfqdn".to_string();
    }
    if hostnames.len() > MAX_UPDATE_HOSTNAMES {
        return "numhost".to_string();
    }

    let myips = flatten_params(&query.myip);
    if myips.is_empty() {
        return "badrequest".to_string();
    }
    let Some(ips) = parse_ips(&myips) else {
        return "badrequest".to_string();
    };

    let mut lines = Vec::with_capacity(hostnames.len());
    for host in &hostnames {
        if !hostname::valid_hostname(host) {
            lines.push("notfqdn".to_string());
            continue;
        }
        let name = hostname::normalize(host);

        let status = match store::with_deadline(store::API_DEADLINE, db.get_ips(&name)).await {
            Ok(original) if !addrs_changed(&original, &ips) => "nochg",
            _ => "good",
        };
        match store::with_deadline(store::API_DEADLINE, db.put_ips(&name, ips.clone())).await {
            Ok(()) => {
                info!(%name, addrs = %join_ips(&ips), "accepted update");
                lines.push(format!("{status} {}", join_ips(&ips)));
            }
            Err(err) => {
                warn!(%name, error = %err, "update write failed");
                lines.push("dnserr".to_string());
            }
        }
    }
    lines.join("\n")
}

async fn v1_certificate(
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Basic>>>,
    Query(query): Query<CertificateQuery>,
) -> Response {
    if !authorized(&state, &auth) {
        return unauthorized();
    }

    let hostnames = flatten_params(&query.hostname);
    if hostnames.len() != 1 {
        return "notfqdn".into_response();
    }
    let host = &hostnames[0];
    if !hostname::valid_hostname(host) {
        return "notfqdn".into_response();
    }

    match state.certs.get_certificate(host, SYNC_DEADLINE).await {
        Ok(cached) => {
            debug!(%host, "served certificate");
            format!("private\n{}public\n{}", cached.key_pem, cached.chain_pem).into_response()
        }
        Err(Error::InvalidName(_)) => "notfqdn".into_response(),
        Err(err) => {
            warn!(%host, error = %err, "certificate retrieval failed");
            "dnserr".into_response()
        }
    }
}
