use anyhow::Result;
use base64::Engine as _;
use serde_json::Value;
use std::io::{Cursor, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};

use image::{ImageFormat, Rgb, RgbImage};
use ppe_guard::api::{ApiConfig, ApiHandle, ApiServer};
use ppe_guard::config::{ServiceConfig, ZoneSettings};
use ppe_guard::detect::{BoxedResult, RawOutput, SharedBackend, StubBackend};
use ppe_guard::service::ServiceContext;
use ppe_guard::BBox;

fn service_config() -> ServiceConfig {
    ServiceConfig {
        zones: ZoneSettings {
            config_path: None,
            ..ZoneSettings::default()
        },
        ..ServiceConfig::default()
    }
}

fn ready_context() -> Arc<ServiceContext> {
    let output = RawOutput::Boxed(vec![BoxedResult {
        bbox: BBox::new(100., 100., 200., 400.),
        class_id: 5,
        confidence: 0.9,
    }]);
    let backend: SharedBackend = Arc::new(Mutex::new(
        StubBackend::new().with_input_size(640).with_output(output),
    ));
    Arc::new(ServiceContext::new(service_config(), Some(backend)).expect("context"))
}

fn spawn(ctx: Arc<ServiceContext>, max_body_bytes: usize) -> ApiHandle {
    let cfg = ApiConfig {
        addr: "127.0.0.1:0".to_string(),
        max_body_bytes,
    };
    ApiServer::new(cfg, ctx).spawn().expect("spawn api")
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([200, 180, 40]));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

fn send(addr: SocketAddr, method: &str, path: &str, body: &[u8]) -> Result<(u16, Vec<u8>)> {
    let mut stream = TcpStream::connect(addr)?;
    let head = format!(
        "{} {} HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        method,
        path,
        body.len()
    );
    stream.write_all(head.as_bytes())?;
    stream.write_all(body)?;
    read_response(&mut stream)
}

fn read_response(stream: &mut TcpStream) -> Result<(u16, Vec<u8>)> {
    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;
    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| anyhow::anyhow!("no header terminator"))?;
    let head = String::from_utf8_lossy(&response[..split]).to_string();
    let status = head
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("no status"))?
        .parse()?;
    Ok((status, response[split + 4..].to_vec()))
}

fn json(body: &[u8]) -> Value {
    serde_json::from_slice(body).expect("json body")
}

#[test]
fn unready_service_reports_unhealthy_and_refuses_detection() -> Result<()> {
    let ctx = Arc::new(ServiceContext::new(service_config(), None)?);
    let handle = spawn(ctx, 1024);

    let (status, body) = send(handle.addr, "GET", "/health", b"")?;
    assert_eq!(status, 200);
    let health = json(&body);
    assert_eq!(health["status"], "unhealthy");
    assert_eq!(health["model_loaded"], false);
    assert_eq!(health["model_type"], "none");
    assert_eq!(health["device"], "cpu");

    let (status, body) = send(handle.addr, "POST", "/detect", b"jpeg")?;
    assert_eq!(status, 503);
    assert!(json(&body)["error"].is_string());

    let (status, _) = send(handle.addr, "POST", "/detect/base64", br#"{"image": "aGk="}"#)?;
    assert_eq!(status, 503);

    handle.stop()?;
    Ok(())
}

#[test]
fn detect_endpoints_return_frame_reports() -> Result<()> {
    let handle = spawn(ready_context(), 1 << 20);
    let image = png(640, 480);

    let (status, body) = send(handle.addr, "POST", "/detect", &image)?;
    assert_eq!(status, 200);
    let report = json(&body);
    assert_eq!(report["detections"].as_array().unwrap().len(), 1);
    assert_eq!(report["detections"][0]["class_name"], "Person");
    assert_eq!(report["safety_check"]["people_count"], 1);
    assert_eq!(report["safety_check"]["compliance_rate"], 100.0);
    assert!(report["zone_violations"].as_array().unwrap().is_empty());
    assert!(report["processing_time_ms"].as_f64().unwrap() >= 0.0);

    let encoded = base64::engine::general_purpose::STANDARD.encode(&image);
    let request = serde_json::json!({ "image": format!("data:image/png;base64,{}", encoded) });
    let (status, body) = send(
        handle.addr,
        "POST",
        "/detect/base64",
        request.to_string().as_bytes(),
    )?;
    assert_eq!(status, 200);
    assert_eq!(json(&body)["safety_check"]["people_count"], 1);

    let (status, body) = send(handle.addr, "POST", "/detect?confidence_threshold=0.95", &image)?;
    assert_eq!(status, 200);
    assert!(json(&body)["detections"].as_array().unwrap().is_empty());

    let (status, _) = send(handle.addr, "POST", "/detect?confidence_threshold=high", &image)?;
    assert_eq!(status, 400);
    let (status, _) = send(handle.addr, "POST", "/detect", b"definitely not an image")?;
    assert_eq!(status, 400);
    let (status, _) = send(handle.addr, "POST", "/detect/base64", b"{")?;
    assert_eq!(status, 400);

    let (status, body) = send(handle.addr, "GET", "/tracks", b"")?;
    assert_eq!(status, 200);
    let tracks = json(&body);
    assert_eq!(tracks.as_array().unwrap().len(), 1);
    let track_id = tracks[0]["id"].as_u64().unwrap();

    let (status, body) = send(handle.addr, "GET", &format!("/tracks/{}", track_id), b"")?;
    assert_eq!(status, 200);
    assert_eq!(json(&body)["class_name"], "Person");
    let (status, _) = send(handle.addr, "GET", "/tracks/abc", b"")?;
    assert_eq!(status, 400);
    let (status, _) = send(handle.addr, "GET", "/tracks/9999", b"")?;
    assert_eq!(status, 404);

    let (status, _) = send(handle.addr, "POST", "/tracks/reset", b"")?;
    assert_eq!(status, 200);
    let (_, body) = send(handle.addr, "GET", "/tracks", b"")?;
    assert!(json(&body).as_array().unwrap().is_empty());

    let (status, body) = send(handle.addr, "GET", "/metrics", b"")?;
    assert_eq!(status, 200);
    let text = String::from_utf8(body)?;
    assert!(text.contains("ppe_frames_processed_total 3"));
    assert!(text.contains("ppe_detections_total{class_name=\"Person\"} 2"));

    handle.stop()?;
    Ok(())
}

#[test]
fn zone_crud_round_trip() -> Result<()> {
    let handle = spawn(ready_context(), 1 << 20);
    let zone = br#"{
        "id": "dock",
        "name": "Loading dock",
        "polygon": [{"x": 0, "y": 0}, {"x": 100, "y": 0}, {"x": 100, "y": 100}],
        "required_ppe": ["Hardhat", "Safety Vest"]
    }"#;

    let (status, body) = send(handle.addr, "POST", "/zones", zone)?;
    assert_eq!(status, 200);
    let created = json(&body);
    assert_eq!(created["status"], "created");
    assert_eq!(created["zone_id"], "dock");

    let (status, body) = send(handle.addr, "GET", "/zones", b"")?;
    assert_eq!(status, 200);
    let zones = json(&body);
    assert_eq!(zones.as_array().unwrap().len(), 1);
    assert_eq!(zones[0]["severity"], "warning");
    assert_eq!(zones[0]["enabled"], true);

    let (status, body) = send(
        handle.addr,
        "PATCH",
        "/zones/dock",
        br#"{"severity": "critical", "enabled": false}"#,
    )?;
    assert_eq!(status, 200);
    let updated = json(&body);
    assert_eq!(updated["severity"], "critical");
    assert_eq!(updated["enabled"], false);
    assert_eq!(updated["name"], "Loading dock");

    let (status, _) = send(handle.addr, "PATCH", "/zones/dock", br#"{"polygon": []}"#)?;
    assert_eq!(status, 422);
    let (status, _) = send(handle.addr, "PATCH", "/zones/dock", br#"{"colour": "red"}"#)?;
    assert_eq!(status, 400);

    let (status, body) = send(handle.addr, "GET", "/zones/dock/violations", b"")?;
    assert_eq!(status, 200);
    assert!(json(&body).as_array().unwrap().is_empty());

    let (status, _) = send(handle.addr, "DELETE", "/zones/dock", b"")?;
    assert_eq!(status, 200);
    let (status, _) = send(handle.addr, "GET", "/zones/dock", b"")?;
    assert_eq!(status, 404);
    let (status, _) = send(handle.addr, "DELETE", "/zones/dock", b"")?;
    assert_eq!(status, 404);
    let (status, _) = send(handle.addr, "GET", "/zones/dock/violations", b"")?;
    assert_eq!(status, 404);

    let degenerate = br#"{"id": "line", "name": "Line", "polygon": [{"x": 0, "y": 0}, {"x": 5, "y": 5}]}"#;
    let (status, _) = send(handle.addr, "POST", "/zones", degenerate)?;
    assert_eq!(status, 422);
    let bad_id = br#"{"id": "a b", "name": "Spaces", "polygon": [{"x": 0, "y": 0}, {"x": 5, "y": 0}, {"x": 5, "y": 5}]}"#;
    let (status, _) = send(handle.addr, "POST", "/zones", bad_id)?;
    assert_eq!(status, 422);
    let (status, _) = send(handle.addr, "POST", "/zones", b"not json")?;
    assert_eq!(status, 400);

    handle.stop()?;
    Ok(())
}

#[test]
fn routing_and_size_limits() -> Result<()> {
    let handle = spawn(ready_context(), 64);

    let (status, _) = send(handle.addr, "PUT", "/health", b"")?;
    assert_eq!(status, 405);
    let (status, _) = send(handle.addr, "GET", "/detect", b"")?;
    assert_eq!(status, 405);
    let (status, _) = send(handle.addr, "GET", "/tracks/reset", b"")?;
    assert_eq!(status, 405);
    let (status, body) = send(handle.addr, "GET", "/nope", b"")?;
    assert_eq!(status, 404);
    assert_eq!(json(&body)["error"], "not found");

    // Headers only: the server refuses before reading any body.
    let mut stream = TcpStream::connect(handle.addr)?;
    stream.write_all(
        b"POST /detect HTTP/1.1\r\nHost: localhost\r\nContent-Length: 4096\r\nConnection: close\r\n\r\n",
    )?;
    let (status, _) = read_response(&mut stream)?;
    assert_eq!(status, 413);

    handle.stop()?;
    Ok(())
}

#[test]
fn metrics_route_can_be_disabled() -> Result<()> {
    let config = ServiceConfig {
        metrics_enabled: false,
        ..service_config()
    };
    let ctx = Arc::new(ServiceContext::new(config, None)?);
    let handle = spawn(ctx, 1024);

    let (status, _) = send(handle.addr, "GET", "/metrics", b"")?;
    assert_eq!(status, 404);

    handle.stop()?;
    Ok(())
}
