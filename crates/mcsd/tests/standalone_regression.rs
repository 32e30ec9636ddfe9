//! Standalone regression tests.
//!
//! Drives the full router the way a client would: schedules app groups,
//! reads runs back, uploads RTT rows and triggers GC.

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use tower::ServiceExt;

use mcs_api::build_router;
use mcs_core::config::CloudConfig;
use mcs_core::{CloudType, ResSet, SchedulerConfig};
use mcs_scheduler::{CloudProvider, Infra, KubeCluster, Scheduler, StaticCloud, StaticCluster};
use mcs_state::StateStore;

fn res(vcpu: f64, ram: f64, storage: f64) -> ResSet {
    ResSet {
        vcpu,
        ram,
        vm: -1.0,
        volume: -1.0,
        storage,
        port: -1.0,
    }
}

fn test_config(dry_run: bool) -> SchedulerConfig {
    let mut config = SchedulerConfig::default();
    config.ga.chromosomes = 6;
    config.ga.iterations = 5;
    config.ga.seed = Some(11);
    config.deploy.dry_run = dry_run;
    config.clouds = vec![
        CloudConfig {
            name: "NOKIA4".into(),
            cloud_type: CloudType::Proxmox,
            limit: res(56.0, 128_796.75, 1396.52),
            in_use: res(26.0, 59_392.0, 629.0),
        },
        CloudConfig {
            name: "CLAAUDIA".into(),
            cloud_type: CloudType::Openstack,
            limit: res(-1.0, -1.0, -1.0),
            in_use: res(0.0, 0.0, 0.0),
        },
    ];
    config
}

fn test_scheduler(dry_run: bool) -> Arc<Scheduler> {
    let config = test_config(dry_run);
    let clouds: Vec<Arc<dyn CloudProvider>> = config
        .clouds
        .iter()
        .enumerate()
        .map(|(i, c)| Arc::new(StaticCloud::from_config(c, i as u8 + 1)) as Arc<dyn CloudProvider>)
        .collect();
    let kube: Arc<dyn KubeCluster> = Arc::new(StaticCluster::new());
    Arc::new(Scheduler::new(
        Infra::new(clouds, kube),
        StateStore::open_in_memory().unwrap(),
        config,
    ))
}

fn app_group() -> serde_json::Value {
    let app = |name: &str, cpu: &str, priority: i32, deps: &[&str]| {
        serde_json::json!({
            "name": name,
            "replicas": 1,
            "priority": priority,
            "autoScheduled": true,
            "containers": [{
                "name": name,
                "image": "nginx:1.25",
                "resources": {
                    "limits": { "cpu": cpu, "memory": "1024Mi", "storage": "10Gi" },
                    "requests": { "cpu": cpu, "memory": "1024Mi", "storage": "10Gi" }
                }
            }],
            "dependencies": deps.iter().map(|d| serde_json::json!({ "appName": d })).collect::<Vec<_>>()
        })
    };
    serde_json::json!([app("web", "2", 5, &["db"]), app("db", "1.5", 10, &[])])
}

fn schedule_request(body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/doNewAppGroup")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

async fn json_body(resp: Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn standalone_healthz() {
    let router = build_router(test_scheduler(false));

    let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn standalone_schedule_and_read_run() {
    let router = build_router(test_scheduler(false));

    let resp = router.clone().oneshot(schedule_request(&app_group())).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let infos = json_body(resp).await;
    for info in infos.as_array().unwrap() {
        assert_eq!(info["hosts"].as_array().unwrap().len(), 1);
        assert!(!info["hosts"][0]["hostName"].as_str().unwrap().is_empty());
    }

    let req = Request::builder().uri("/api/v1/runs").body(Body::empty()).unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let runs = json_body(resp).await;
    let run = &runs["data"][0];
    assert_eq!(run["algorithm"], "Mcssga");
    assert_eq!(run["app_count"], 2);

    let id = run["id"].as_str().unwrap().to_string();
    let req = Request::builder()
        .uri(format!("/api/v1/runs/{id}"))
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn standalone_dry_run_plans_only() {
    let scheduler = test_scheduler(true);
    let router = build_router(Arc::clone(&scheduler));

    let req = Request::builder()
        .method("POST")
        .uri("/doNewAppGroup")
        .header("content-type", "application/json")
        .header("Mcm-Scheduling-Algorithm", "Amaga")
        .header("Expected-Time-One-Cpu", "35")
        .body(Body::from(serde_json::to_vec(&app_group()).unwrap()))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let infos = json_body(resp).await;
    assert!(infos.as_array().unwrap().iter().all(|i| i["status"] == "planned"));

    let runs = scheduler.state().list_runs(10).unwrap();
    assert_eq!(runs[0].algorithm, "Amaga");
    assert_eq!(runs[0].expected_time_one_cpu, 35.0);
    for placement in runs[0].placements.iter().filter(|p| p.accepted) {
        let cpu = placement.cpu.unwrap();
        assert!((placement.estimated_secs.unwrap() * cpu - 35.0).abs() < 1e-9);
    }
    assert!(scheduler.state().list_auto_vms().unwrap().is_empty());
}

#[tokio::test]
async fn standalone_rejects_bad_requests() {
    let router = build_router(test_scheduler(false));

    // Unknown algorithm.
    let mut req = schedule_request(&app_group());
    req.headers_mut()
        .insert("Mcm-Scheduling-Algorithm", "Greedy".parse().unwrap());
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Dependency on an app outside the group.
    let mut group = app_group();
    group[1]["dependencies"] = serde_json::json!([{ "appName": "cache" }]);
    let resp = router.clone().oneshot(schedule_request(&group)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = json_body(resp).await;
    assert!(body["error"].as_str().unwrap().contains("cache"));

    // Not JSON at all.
    let req = Request::builder()
        .method("POST")
        .uri("/doNewAppGroup")
        .header("content-type", "application/json")
        .body(Body::from("[{"))
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Missing content type.
    let req = Request::builder()
        .method("POST")
        .uri("/doNewAppGroup")
        .body(Body::from(serde_json::to_vec(&app_group()).unwrap()))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn standalone_net_state_roundtrip() {
    let router = build_router(test_scheduler(false));

    let body = serde_json::json!({ "peers": { "CLAAUDIA": { "rtt": 31.5 } } });
    let req = Request::builder()
        .method("PUT")
        .uri("/api/v1/netstate/NOKIA4")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let req = Request::builder().uri("/api/v1/netstate").body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    let rows = json_body(resp).await;
    assert_eq!(rows["data"][0]["source"], "NOKIA4");
    assert_eq!(rows["data"][0]["peers"]["CLAAUDIA"]["rtt"], 31.5);
}

#[tokio::test]
async fn standalone_gc_after_dry_run_is_noop() {
    let router = build_router(test_scheduler(true));

    let resp = router.clone().oneshot(schedule_request(&app_group())).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/gc")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let report = json_body(resp).await;
    assert!(report["data"]["deleted_vms"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn standalone_unknown_run_is_404() {
    let router = build_router(test_scheduler(false));

    let req = Request::builder()
        .uri("/api/v1/runs/run-0000000000000-0000000000000000")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
