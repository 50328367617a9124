//! `/healthz` endpoint (ADDED A4 in SPEC_FULL.md), modeled directly on the
//! teacher's `healthcheck.rs`: a bare `hyper` 1.x service loop with no router
//! crate, since there is exactly one route.
//!
//! "Healthy" here means the engine can still reach its durable queue — the
//! one dependency every CDC path needs and the cheapest one to probe without
//! doing real work against the source database or the list backend.

use std::convert::Infallible;
use std::net::SocketAddr;
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

pub async fn server(port: u16, ctx: Arc<EngineContext>) -> std::io::Result<()> {
    info!("healthcheck endpoint http://0.0.0.0:{port}");
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let ctx = ctx.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| healthcheck(req, ctx.clone()));
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!("healthcheck endpoint error: {err:?}");
            }
        });
    }
}

async fn healthcheck(
    _: Request<hyper::body::Incoming>,
    ctx: Arc<EngineContext>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    // Any stream name works here; the queue adapter answers `len` from its
    // own connection without touching stream contents.
    let reachable = ctx.queue.len("healthcheck").await.is_ok();

    let body = if reachable { "up" } else { "down" };
    let status = if reachable { 200 } else { 502 };

    let response = Response::builder()
        .header(hyper::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("healthcheck unavailable"))));

    Ok(response)
}
