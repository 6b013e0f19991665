use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{HeaderValue, Request, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, TextEncoder,
    register_histogram_vec, register_int_counter_vec, register_int_gauge,
};
use std::sync::OnceLock;
use std::time::Instant;

const METRIC_PREFIX: &str = "webfront";

/// Metrics 注册结果，可能包含注册错误
type MetricRegistration<T> = Result<T, prometheus::Error>;

fn http_requests_total() -> &'static MetricRegistration<IntCounterVec> {
    static METRIC: OnceLock<MetricRegistration<IntCounterVec>> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter_vec!(
            Opts::new(
                format!("{METRIC_PREFIX}_http_requests_total"),
                "HTTP 请求总数"
            ),
            &["method", "path", "status"]
        )
    })
}

fn http_request_duration_seconds() -> &'static MetricRegistration<HistogramVec> {
    static METRIC: OnceLock<MetricRegistration<HistogramVec>> = OnceLock::new();
    METRIC.get_or_init(|| {
        let opts = HistogramOpts::new(
            format!("{METRIC_PREFIX}_http_request_duration_seconds"),
            "HTTP 请求耗时（秒）",
        );
        register_histogram_vec!(opts, &["method", "path"])
    })
}

fn cert_tasks_total() -> &'static MetricRegistration<IntCounterVec> {
    static METRIC: OnceLock<MetricRegistration<IntCounterVec>> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter_vec!(
            Opts::new(
                format!("{METRIC_PREFIX}_cert_tasks_total"),
                "证书任务处理结果计数"
            ),
            &["outcome"]
        )
    })
}

fn proxy_reloads_total() -> &'static MetricRegistration<IntCounterVec> {
    static METRIC: OnceLock<MetricRegistration<IntCounterVec>> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter_vec!(
            Opts::new(
                format!("{METRIC_PREFIX}_proxy_reloads_total"),
                "nginx 重载次数"
            ),
            &["result"]
        )
    })
}

fn cert_queue_depth() -> &'static MetricRegistration<IntGauge> {
    static METRIC: OnceLock<MetricRegistration<IntGauge>> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_gauge!(
            format!("{METRIC_PREFIX}_cert_queue_depth"),
            "待处理证书任务数"
        )
    })
}

pub fn inc_cert_task(outcome: &str) {
    if let Ok(counter) = cert_tasks_total() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn inc_proxy_reload(ok: bool) {
    if let Ok(counter) = proxy_reloads_total() {
        counter
            .with_label_values(&[if ok { "ok" } else { "failed" }])
            .inc();
    }
}

pub fn set_queue_depth(depth: usize) {
    if let Ok(gauge) = cert_queue_depth() {
        gauge.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }
}

pub async fn metrics_middleware(req: Request<Body>, next: Next) -> Response {
    let method = req.method().as_str().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "<unmatched>".to_string());

    let start = Instant::now();
    let response = next.run(req).await;
    let elapsed = start.elapsed().as_secs_f64();

    let status = response.status().as_u16().to_string();

    if let Ok(counter) = http_requests_total() {
        counter.with_label_values(&[&method, &path, &status]).inc();
    }
    if let Ok(histogram) = http_request_duration_seconds() {
        histogram
            .with_label_values(&[&method, &path])
            .observe(elapsed);
    }

    response
}

pub fn render_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => {
            let mut resp = Response::new(Body::from(buffer));
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_str(encoder.format_type())
                    .unwrap_or_else(|_| HeaderValue::from_static("text/plain; version=0.0.4")),
            );
            resp
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            // 使用已知的有效值构造响应，避免 panic
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "Metrics encoding failed",
            )
                .into_response()
        }
    }
}
