//! Plain HTTP endpoint for Prometheus scrapes and health checks

use http_body_util::Full;
use hyper::{body::Bytes, server::conn::http1, service::service_fn, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use lb_controller::ControllerMetrics;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

pub async fn serve(addr: SocketAddr, metrics: ControllerMetrics) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let metrics = metrics.clone();
                async move { Ok::<_, Infallible>(handle_request(req, &metrics)) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving metrics connection from {}: {}", peer_addr, e);
            }
        });
    }
}

fn handle_request<B>(req: Request<B>, metrics: &ControllerMetrics) -> Response<Full<Bytes>> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => match metrics.gather() {
            Ok(text) => response(StatusCode::OK, Some("text/plain; version=0.0.4"), text),
            Err(e) => {
                warn!("Failed to gather metrics: {}", e);
                response(StatusCode::INTERNAL_SERVER_ERROR, None, "Failed to gather metrics\n".to_string())
            }
        },
        (_, "/healthz") => response(StatusCode::OK, None, "OK\n".to_string()),
        _ => response(StatusCode::NOT_FOUND, None, "Not Found\n".to_string()),
    }
}

fn response(status: StatusCode, content_type: Option<&str>, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    if let Some(content_type) = content_type {
        if let Ok(value) = content_type.parse() {
            response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
        }
    }
    response
}
