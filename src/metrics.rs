//! `/metrics` endpoint (ADDED A4), OpenMetrics/Prometheus text exposition
//! modeled on the teacher's `stats::open_metric` + `stats::http_server`: an
//! `OpenMetric` trait per gauge, rendered through a shared `Metric` wrapper,
//! concatenated into one response body.

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::context::EngineContext;

pub trait OpenMetric: Send + Sync {
    fn name(&self) -> String;
    fn measurements(&self) -> Vec<Measurement>;
    fn unit(&self) -> Option<String> {
        None
    }
    fn metric_type(&self) -> String {
        "gauge".into()
    }
    fn help(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct Measurement {
    pub labels: Vec<(String, String)>,
    pub measurement: f64,
}

impl Measurement {
    pub fn render(&self, name: &str) -> String {
        let labels = if self.labels.is_empty() {
            String::new()
        } else {
            let labels = self
                .labels
                .iter()
                .map(|(name, value)| format!("{name}=\"{value}\""))
                .collect::<Vec<_>>();
            format!("{{{}}}", labels.join(","))
        };
        format!("{name}{labels} {:.3}", self.measurement)
    }
}

pub struct Metric {
    metric: Box<dyn OpenMetric>,
}

impl Metric {
    pub fn new(metric: impl OpenMetric + 'static) -> Self {
        Self { metric: Box::new(metric) }
    }
}

impl Deref for Metric {
    type Target = Box<dyn OpenMetric>;

    fn deref(&self) -> &Self::Target {
        &self.metric
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        writeln!(f, "# TYPE {name} {}", self.metric_type())?;
        if let Some(unit) = self.unit() {
            writeln!(f, "# UNIT {name} {unit}")?;
        }
        if let Some(help) = self.help() {
            writeln!(f, "# HELP {name} {help}")?;
        }
        for measurement in self.measurements() {
            writeln!(f, "{}", measurement.render(&name))?;
        }
        Ok(())
    }
}

/// Depth of the shared CDC durable queue (spec §5 backpressure watermark).
struct QueueDepth(u64);

impl OpenMetric for QueueDepth {
    fn name(&self) -> String {
        "syncbridge_queue_depth".into()
    }
    fn help(&self) -> Option<String> {
        Some("Pending messages on the CDC durable queue.".into())
    }
    fn measurements(&self) -> Vec<Measurement> {
        vec![Measurement { labels: Vec::new(), measurement: self.0 as f64 }]
    }
}

async fn gather(ctx: &EngineContext) -> String {
    let depth = ctx.queue.len(&ctx.config.cdc.stream_key).await.unwrap_or(0);
    let metrics: Vec<Metric> = vec![Metric::new(QueueDepth(depth))];
    metrics.iter().map(|m| m.to_string()).collect::<Vec<_>>().join("\n")
}

async fn metrics_response(
    _: Request<hyper::body::Incoming>,
    ctx: Arc<EngineContext>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let body = gather(&ctx).await;
    let response = Response::builder()
        .header(hyper::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("metrics unavailable"))));
    Ok(response)
}

pub async fn server(port: u16, ctx: Arc<EngineContext>) -> std::io::Result<()> {
    info!("OpenMetrics endpoint http://0.0.0.0:{port}");
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let ctx = ctx.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| metrics_response(req, ctx.clone()));
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!("OpenMetrics endpoint error: {err:?}");
            }
        });
    }
}
