use std::fmt::Write;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};

use adasplit_common::{RouterStatus, TaskClass};

use crate::AppState;

/// GET /status - scheduler snapshot
async fn status(State(state): State<Arc<AppState>>) -> Json<RouterStatus> {
    Json(state.status())
}

/// GET /metrics - Prometheus text format
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let body = render_metrics(&state.status());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

fn render_metrics(status: &RouterStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# HELP adasplit_up Whether the router is up");
    let _ = writeln!(out, "# TYPE adasplit_up gauge");
    let _ = writeln!(out, "adasplit_up 1");
    let _ = writeln!(out, "# HELP adasplit_info Router information");
    let _ = writeln!(out, "# TYPE adasplit_info gauge");
    let _ = writeln!(
        out,
        "adasplit_info{{version=\"{}\"}} 1",
        env!("CARGO_PKG_VERSION")
    );

    let _ = writeln!(out, "# HELP adasplit_queue_depth Requests waiting for a backend");
    let _ = writeln!(out, "# TYPE adasplit_queue_depth gauge");
    for (class, depth) in [
        (TaskClass::Short, status.queues.short),
        (TaskClass::Long, status.queues.long),
    ] {
        let _ = writeln!(out, "adasplit_queue_depth{{class=\"{}\"}} {}", class, depth);
    }

    let _ = writeln!(out, "# HELP adasplit_partition Backends serving each role");
    let _ = writeln!(out, "# TYPE adasplit_partition gauge");
    for (role, count) in [
        (TaskClass::Short, status.partition.short),
        (TaskClass::Long, status.partition.long),
    ] {
        let _ = writeln!(out, "adasplit_partition{{role=\"{}\"}} {}", role, count);
    }

    let _ = writeln!(out, "# HELP adasplit_backend_accepted Requests accepted per backend");
    let _ = writeln!(out, "# TYPE adasplit_backend_accepted gauge");
    for handle in &status.handles {
        let _ = writeln!(
            out,
            "adasplit_backend_accepted{{backend=\"{}\",role=\"{}\"}} {}",
            handle.id, handle.role, handle.accepted
        );
    }

    let _ = writeln!(out, "# HELP adasplit_seconds_since_rebalance Time since the last role change");
    let _ = writeln!(out, "# TYPE adasplit_seconds_since_rebalance gauge");
    let _ = writeln!(out, "adasplit_seconds_since_rebalance {:.3}", status.secs_since_rebalance);
    out
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(state)
}
