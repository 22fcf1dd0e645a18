//! HTTP/1.1 surface: one request per connection, JSON bodies.

mod http;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::ServiceError;
use crate::service::{DetectOptions, ServiceContext};
use crate::zones::{Zone, ZoneDraft, ZoneUpdate};

use http::{read_request, write_error, write_response, HttpRequest, RequestError};

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_body_bytes: usize,
}

impl ApiConfig {
    pub fn from_service(ctx: &ServiceContext) -> Self {
        Self {
            addr: ctx.config().http_addr.clone(),
            max_body_bytes: ctx.config().max_body_bytes,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("http server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    ctx: Arc<ServiceContext>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, ctx: Arc<ServiceContext>) -> Self {
        Self { cfg, ctx }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        log::info!("http api listening on {}", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let ctx = self.ctx;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &cfg, &ctx, shutdown_thread) {
                log::error!("http api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: &ApiConfig,
    ctx: &ServiceContext,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, cfg, ctx) {
                    log::warn!("http request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, cfg: &ApiConfig, ctx: &ServiceContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream, cfg.max_body_bytes) {
        Ok(request) => request,
        Err(RequestError::TooLarge) => {
            write_error(&mut stream, 413, "request too large")?;
            return Ok(());
        }
        Err(err) => {
            // Best effort: the peer may already be gone.
            let _ = write_error(&mut stream, 400, &err.to_string());
            return Err(err.into());
        }
    };

    match route(&request, ctx) {
        Ok(reply) => write_response(&mut stream, reply.status, reply.content_type, &reply.body),
        Err(RouteError::Service(err)) => {
            if let ServiceError::Internal(detail) = &err {
                log::error!("{} {} failed: {}", request.method, request.path, detail);
            }
            write_error(&mut stream, err.http_status(), &err.to_string())
        }
        Err(RouteError::NotFound) => write_error(&mut stream, 404, "not found"),
        Err(RouteError::MethodNotAllowed) => write_error(&mut stream, 405, "method not allowed"),
    }
}

struct Reply {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Reply {
    fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, RouteError> {
        let body = serde_json::to_vec(value)
            .map_err(|err| ServiceError::Internal(format!("encode response: {}", err)))?;
        Ok(Self {
            status: 200,
            content_type: "application/json",
            body,
        })
    }
}

enum RouteError {
    Service(ServiceError),
    NotFound,
    MethodNotAllowed,
}

impl From<ServiceError> for RouteError {
    fn from(err: ServiceError) -> Self {
        RouteError::Service(err)
    }
}

#[derive(Deserialize)]
struct Base64DetectRequest {
    image: String,
    #[serde(default)]
    confidence_threshold: Option<f32>,
}

fn route(request: &HttpRequest, ctx: &ServiceContext) -> Result<Reply, RouteError> {
    let segments: Vec<&str> = request
        .path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["health"]) => Reply::json(&ctx.health()),

        ("POST", ["detect"]) => {
            let confidence_threshold = match request.query_param("confidence_threshold") {
                Some(value) => Some(value.parse::<f32>().map_err(|_| {
                    ServiceError::InvalidRequest("confidence_threshold must be a number".into())
                })?),
                None => None,
            };
            let options = DetectOptions {
                confidence_threshold,
            };
            Reply::json(&ctx.detect_image(&request.body, options)?)
        }
        ("POST", ["detect", "base64"]) => {
            let body: Base64DetectRequest = parse_json(&request.body)?;
            let options = DetectOptions {
                confidence_threshold: body.confidence_threshold,
            };
            Reply::json(&ctx.detect_base64(&body.image, options)?)
        }

        ("GET", ["zones"]) => Reply::json(&ctx.list_zones()?),
        ("POST", ["zones"]) => {
            let draft: ZoneDraft = parse_json(&request.body)?;
            let zone = Zone::try_from(draft).map_err(ServiceError::from)?;
            let zone_id = ctx.upsert_zone(zone)?;
            Reply::json(&serde_json::json!({ "status": "created", "zone_id": zone_id }))
        }
        ("GET", ["zones", zone_id]) => Reply::json(&ctx.get_zone(zone_id)?),
        ("PATCH", ["zones", zone_id]) => {
            let update: ZoneUpdate = parse_json(&request.body)?;
            Reply::json(&ctx.update_zone(zone_id, update)?)
        }
        ("DELETE", ["zones", zone_id]) => {
            ctx.delete_zone(zone_id)?;
            Reply::json(&serde_json::json!({ "status": "deleted" }))
        }
        ("GET", ["zones", zone_id, "violations"]) => {
            Reply::json(&ctx.zone_violations(zone_id)?)
        }

        ("GET", ["tracks"]) => Reply::json(&ctx.tracks()?),
        ("POST", ["tracks", "reset"]) => {
            ctx.reset_tracks()?;
            Reply::json(&serde_json::json!({ "status": "reset" }))
        }
        (_, ["tracks", "reset"]) => Err(RouteError::MethodNotAllowed),
        ("GET", ["tracks", track_id]) => {
            let track_id: u64 = track_id.parse().map_err(|_| {
                ServiceError::InvalidRequest(format!("invalid track id '{}'", track_id))
            })?;
            Reply::json(&ctx.track(track_id)?)
        }

        ("GET", ["metrics"]) if ctx.metrics_enabled() => Ok(Reply {
            status: 200,
            content_type: "text/plain; version=0.0.4",
            body: ctx.metrics_text()?.into_bytes(),
        }),

        (_, ["health"])
        | (_, ["detect"])
        | (_, ["detect", "base64"])
        | (_, ["zones"])
        | (_, ["zones", _])
        | (_, ["zones", _, "violations"])
        | (_, ["tracks"])
        | (_, ["tracks", _]) => Err(RouteError::MethodNotAllowed),
        _ => Err(RouteError::NotFound),
    }
}

fn parse_json<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, ServiceError> {
    serde_json::from_slice(body).map_err(|err| ServiceError::InvalidRequest(err.to_string()))
}
