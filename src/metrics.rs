//! Prometheus metrics for sessions, backend calls and model availability
//!
//! All metrics live in the default Prometheus registry. `encode_metrics`
//! renders them in the text exposition format for scraping or dumping.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, Encoder, Histogram,
    HistogramVec, IntCounterVec, TextEncoder,
};

lazy_static! {
    /// Finished sessions by outcome (completed, terminated, failed)
    pub static ref SESSION_OUTCOMES: IntCounterVec = register_int_counter_vec!(
        "agentmesh_session_outcomes_total",
        "Finished sessions by outcome",
        &["outcome"]
    )
    .expect("failed to register SESSION_OUTCOMES metric");

    /// Automatic turns taken per finished session
    pub static ref SESSION_TURNS: Histogram = register_histogram!(
        "agentmesh_session_turns",
        "Automatic turns taken per session",
        vec![1.0, 2.0, 3.0, 5.0, 10.0, 20.0, 50.0]
    )
    .expect("failed to register SESSION_TURNS metric");

    /// Latency of successful generation calls, retries included
    pub static ref LLM_CALL_TIME: HistogramVec = register_histogram_vec!(
        "agentmesh_llm_call_seconds",
        "Latency of successful generation calls",
        &["backend", "model"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    )
    .expect("failed to register LLM_CALL_TIME metric");

    /// Retries spent on transport failures
    pub static ref BACKEND_RETRIES: IntCounterVec = register_int_counter_vec!(
        "agentmesh_backend_retries_total",
        "Backend call retries after transport failures",
        &["backend"]
    )
    .expect("failed to register BACKEND_RETRIES metric");

    /// Availability checks by result (present, absent, unreachable)
    pub static ref AVAILABILITY_CHECKS: IntCounterVec = register_int_counter_vec!(
        "agentmesh_availability_checks_total",
        "Model availability checks",
        &["model", "result"]
    )
    .expect("failed to register AVAILABILITY_CHECKS metric");

    /// Model pulls by result (ready, timeout, failed)
    pub static ref MODEL_PULLS: IntCounterVec = register_int_counter_vec!(
        "agentmesh_model_pulls_total",
        "Model pulls triggered",
        &["model", "result"]
    )
    .expect("failed to register MODEL_PULLS metric");

    /// Code fragments dispatched to the executor, by result (ok, error)
    pub static ref CODE_EXECUTIONS: IntCounterVec = register_int_counter_vec!(
        "agentmesh_code_executions_total",
        "Code fragments dispatched to the execution collaborator",
        &["language", "result"]
    )
    .expect("failed to register CODE_EXECUTIONS metric");
}

/// Render every registered metric in the Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
