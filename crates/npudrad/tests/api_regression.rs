//! API regression tests.
//!
//! Builds a full agent on temporary directories and drives the claim
//! surface through the router.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use npudra_core::config::DeviceConfig;
use npudra_core::{DriverConfig, NpuConfig};
use npudrad::api::build_router;
use npudrad::bootstrap::{self, Agent};
use serde_json::{Value, json};
use tower::ServiceExt;

fn test_agent(dir: &std::path::Path) -> Agent {
    let config = DriverConfig {
        node_name: "node-a".to_string(),
        data_dir: dir.join("data"),
        cdi_root: dir.join("cdi"),
        template_file: dir.join("template-info.txt"),
        devices: vec![
            DeviceConfig {
                logical_index: 0,
                model: "Ascend910B".to_string(),
                ai_core: Some(24),
                memory_gb: Some(64),
            },
            DeviceConfig {
                logical_index: 1,
                model: "Ascend910B".to_string(),
                ai_core: Some(24),
                memory_gb: Some(64),
            },
        ],
        ..DriverConfig::default()
    };
    bootstrap::build(&config).unwrap()
}

fn claim(uid: &str, device: &str, template: &str) -> Value {
    json!({
        "uid": uid,
        "namespace": "default",
        "name": format!("claim-{uid}"),
        "status": {
            "allocation": {
                "devices": {
                    "results": [
                        { "request": "npu", "driver": "npu.example.com", "pool": "node-a", "device": device }
                    ],
                    "config": [
                        {
                            "source": "FromClass",
                            "opaque": {
                                "driver": "npu.example.com",
                                "parameters": NpuConfig::with_template(template).to_raw()
                            }
                        }
                    ]
                }
            }
        }
    })
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn api_list_devices() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(test_agent(dir.path()).driver);

    let (status, body) = send(&router, get("/api/v1/devices")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["npu-0-0", "npu-1-0"]);
    assert_eq!(body["data"][0]["attributes"]["type"], "NPU");
}

#[tokio::test]
async fn api_list_claims_empty() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(test_agent(dir.path()).driver);

    let (status, body) = send(&router, get("/api/v1/claims")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({}));
}

#[tokio::test]
async fn api_prepare_and_unprepare_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(test_agent(dir.path()).driver);

    let (status, body) = send(
        &router,
        post(
            "/api/v1/claims/prepare",
            &json!({ "claims": [claim("c-1", "npu-0-0", "vir02")] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let result = &body["data"]["c-1"];
    assert!(result.get("error").is_none());
    assert_eq!(result["devices"][0]["deviceName"], "npu-0-0");
    assert_eq!(
        result["devices"][0]["cdiDeviceIDs"],
        json!([
            "k8s.npu.example.com/npu=common",
            "k8s.npu.example.com/npu=c-1"
        ])
    );

    let (_, body) = send(&router, get("/api/v1/devices")).await;
    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"npu-0-1"));

    let (_, body) = send(&router, get("/api/v1/claims")).await;
    let env = body["data"]["c-1"][0]["containerEdits"]["env"]
        .as_array()
        .unwrap();
    assert!(env.contains(&json!("ASCEND_VNPU_SPECS=vir02")));

    let (status, body) = send(
        &router,
        post(
            "/api/v1/claims/unprepare",
            &json!({ "claimUids": ["c-1", "unknown"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["c-1"].get("error").is_none());
    assert!(body["data"]["unknown"].get("error").is_none());

    let (_, body) = send(&router, get("/api/v1/claims")).await;
    assert_eq!(body["data"], json!({}));
}

#[tokio::test]
async fn api_prepare_reports_per_claim_errors() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(test_agent(dir.path()).driver);

    let (status, body) = send(
        &router,
        post(
            "/api/v1/claims/prepare",
            &json!({ "claims": [
                claim("ok", "npu-1-0", "vir01"),
                claim("bad", "npu-9-0", "vir01"),
            ] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["ok"].get("error").is_none());
    assert!(
        body["data"]["bad"]["error"]
            .as_str()
            .unwrap()
            .contains("not allocatable")
    );
}

#[tokio::test]
async fn api_rejects_malformed_body() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(test_agent(dir.path()).driver);

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/claims/prepare")
        .header("content-type", "application/json")
        .body(Body::from("{\"claims\": 7}"))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert!(resp.status().is_client_error());
}
