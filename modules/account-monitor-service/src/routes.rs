//! Axum route handlers for the account monitor RPC API.

use std::sync::Arc;

use account_monitor_types::*;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::Serialize;

use crate::app::AppContext;
use crate::error::AppError;

type RpcReply<T> = (StatusCode, Json<RpcResponse<T>>);

fn reply<T: Serialize>(result: Result<T, AppError>) -> RpcReply<T> {
    match result {
        Ok(data) => (StatusCode::OK, Json(RpcResponse::ok(data))),
        Err(e) => {
            let status = e.status_code();
            if status.is_server_error() {
                log::error!("[ACCOUNT_MONITOR] Request failed: {}", e);
            }
            (status, Json(RpcResponse::err(e.to_string())))
        }
    }
}

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        // Accounts
        .route("/rpc/accounts/list", get(accounts_list))
        .route("/rpc/accounts/add", post(accounts_add))
        .route("/rpc/accounts/remove", post(accounts_remove))
        .route("/rpc/accounts/detail", post(accounts_detail))
        .route("/rpc/accounts/import", post(accounts_import))
        // Monitoring
        .route("/rpc/monitoring/toggle", post(monitoring_toggle))
        .route("/rpc/monitoring/fetch_now", post(monitoring_fetch_now))
        // Settings
        .route("/rpc/settings/list", get(settings_list))
        .route("/rpc/settings/update", post(settings_update))
        .route(
            "/rpc/settings/poll_interval",
            get(poll_interval_get).post(poll_interval_set),
        )
        // Reporting
        .route("/rpc/metrics", get(metrics))
        .route("/rpc/status", get(status))
        // Scheduler
        .route("/rpc/scheduler/start", post(scheduler_start))
        .route("/rpc/scheduler/stop", post(scheduler_stop))
        .with_state(ctx)
}

// =====================================================
// Account Endpoints
// =====================================================

// GET /rpc/accounts/list
pub async fn accounts_list(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<ListAccountsQuery>,
) -> RpcReply<AccountPage> {
    reply(ctx.list_accounts(query))
}

// POST /rpc/accounts/add
pub async fn accounts_add(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<AddAccountRequest>,
) -> RpcReply<TrackedAccount> {
    reply(ctx.add_account(req).await)
}

// POST /rpc/accounts/remove
pub async fn accounts_remove(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<RemoveAccountRequest>,
) -> RpcReply<bool> {
    reply(ctx.remove_account(req.id).map(|_| true))
}

// POST /rpc/accounts/detail
pub async fn accounts_detail(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<AccountDetailRequest>,
) -> RpcReply<AccountDetail> {
    reply(ctx.account_detail(req.id, req.limit))
}

// POST /rpc/accounts/import
pub async fn accounts_import(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<ImportAccountsRequest>,
) -> RpcReply<ImportSummary> {
    reply(ctx.import_accounts(&req.rows))
}

// =====================================================
// Monitoring Endpoints
// =====================================================

// POST /rpc/monitoring/toggle
pub async fn monitoring_toggle(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<ToggleMonitoringRequest>,
) -> RpcReply<MonitoringToggleResult> {
    reply(ctx.set_monitoring(&req.ids, req.enabled))
}

// POST /rpc/monitoring/fetch_now
pub async fn monitoring_fetch_now(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<FetchNowRequest>,
) -> RpcReply<FetchReport> {
    reply(ctx.fetch_now(req).await)
}

// =====================================================
// Settings Endpoints
// =====================================================

// GET /rpc/settings/list
pub async fn settings_list(State(ctx): State<Arc<AppContext>>) -> RpcReply<Vec<Setting>> {
    reply(ctx.list_settings())
}

// POST /rpc/settings/update
pub async fn settings_update(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<UpdateSettingRequest>,
) -> RpcReply<Setting> {
    reply(ctx.update_setting(&req.key, &req.value))
}

// GET /rpc/settings/poll_interval
pub async fn poll_interval_get(State(ctx): State<Arc<AppContext>>) -> RpcReply<u64> {
    reply(ctx.poll_interval())
}

// POST /rpc/settings/poll_interval
pub async fn poll_interval_set(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<PollIntervalRequest>,
) -> RpcReply<Setting> {
    reply(ctx.set_poll_interval(req.secs))
}

// =====================================================
// Service Endpoints
// =====================================================

// GET /rpc/metrics
pub async fn metrics(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<MetricsQuery>,
) -> RpcReply<AggregateMetrics> {
    reply(ctx.metrics(query.days))
}

// GET /rpc/status
pub async fn status(State(ctx): State<Arc<AppContext>>) -> RpcReply<ServiceStatus> {
    reply(ctx.status())
}

// POST /rpc/scheduler/start
pub async fn scheduler_start(State(ctx): State<Arc<AppContext>>) -> RpcReply<bool> {
    reply(ctx.start_scheduler())
}

// POST /rpc/scheduler/stop
pub async fn scheduler_stop(State(ctx): State<Arc<AppContext>>) -> RpcReply<bool> {
    reply(Ok(ctx.stop_scheduler()))
}
