//! gRPC `DetectionService` (see `proto/ppe.proto`).
//!
//! The server runs on its own thread with a private tokio runtime so the rest of
//! the service stays synchronous. Inference is moved onto the blocking pool; the
//! service context is shared with the HTTP surface.

pub mod protocol;

pub mod pb {
    tonic::include_proto!("ppe.v1");
}

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{anyhow, Result};
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use crate::service::{DetectOptions, ServiceContext};

use pb::detection_service_server::{DetectionService, DetectionServiceServer};

#[derive(Debug)]
pub struct RpcHandle {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl RpcHandle {
    pub fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("rpc server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct RpcServer {
    addr: String,
    ctx: Arc<ServiceContext>,
}

impl RpcServer {
    pub fn new(addr: impl Into<String>, ctx: Arc<ServiceContext>) -> Self {
        Self {
            addr: addr.into(),
            ctx,
        }
    }

    /// Binds before returning so `RpcHandle::addr` carries the real port.
    pub fn spawn(self) -> Result<RpcHandle> {
        let configured_addr: SocketAddr = self.addr.parse()?;
        let listener = std::net::TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("ppe-rpc")
            .build()?;
        let max_message_bytes = self.ctx.config().max_body_bytes;
        let service = DetectionServiceServer::new(DetectionRpc::new(self.ctx))
            .max_decoding_message_size(max_message_bytes);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        log::info!("rpc listening on {}", addr);

        let join = std::thread::spawn(move || {
            let served = runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener)?;
                Server::builder()
                    .add_service(service)
                    .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                        let _ = shutdown_rx.await;
                    })
                    .await?;
                Ok::<(), anyhow::Error>(())
            });
            if let Err(err) = served {
                log::error!("rpc server stopped: {:#}", err);
            }
        });

        Ok(RpcHandle {
            addr,
            shutdown: Some(shutdown_tx),
            join: Some(join),
        })
    }
}

pub struct DetectionRpc {
    ctx: Arc<ServiceContext>,
}

impl DetectionRpc {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }
}

#[tonic::async_trait]
impl DetectionService for DetectionRpc {
    async fn detect(
        &self,
        request: Request<pb::DetectRequest>,
    ) -> Result<Response<pb::DetectResponse>, Status> {
        let request = request.into_inner();
        if request.image_data.is_empty() {
            return Err(Status::invalid_argument("image_data is required"));
        }
        let options = DetectOptions {
            confidence_threshold: protocol::threshold_override(request.confidence_threshold),
        };

        let ctx = self.ctx.clone();
        let image = request.image_data;
        let report = tokio::task::spawn_blocking(move || ctx.detect_image(&image, options))
            .await
            .map_err(|err| Status::internal(format!("detect task failed: {}", err)))??;

        log::debug!(
            "rpc detect camera '{}': {} detections, {} zone violations",
            request.camera_id,
            report.detections.len(),
            report.zone_violations.len()
        );
        Ok(Response::new(protocol::detect_response(
            &report,
            request.camera_id,
        )))
    }

    async fn health_check(
        &self,
        _request: Request<pb::HealthCheckRequest>,
    ) -> Result<Response<pb::HealthResponse>, Status> {
        Ok(Response::new(protocol::health_response(self.ctx.health())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServiceConfig, ZoneSettings};
    use tonic::Code;

    fn unready() -> Arc<ServiceContext> {
        let config = ServiceConfig {
            zones: ZoneSettings {
                config_path: None,
                ..ZoneSettings::default()
            },
            ..ServiceConfig::default()
        };
        Arc::new(ServiceContext::new(config, None).unwrap())
    }

    #[tokio::test]
    async fn detect_without_backend_is_unavailable() {
        let rpc = DetectionRpc::new(unready());
        let status = rpc
            .detect(Request::new(pb::DetectRequest {
                image_data: b"hello".to_vec(),
                confidence_threshold: 0.0,
                camera_id: "cam-1".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);

        let health = rpc
            .health_check(Request::new(pb::HealthCheckRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(health.status, "unhealthy");
        assert!(!health.model_loaded);
    }

    #[tokio::test]
    async fn empty_image_is_invalid_argument() {
        let rpc = DetectionRpc::new(unready());
        let status = rpc
            .detect(Request::new(pb::DetectRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }
}
