//! Push webhook
//!
//! Classifies a push notification and hands it to the lifecycle controller
//! (own source changed) or to the scheduler (a build source changed). The
//! caller always gets a bare 200: nothing about routing leaks out.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, StatusCode},
};
use drydock_core::domain::resource::ResourceKey;
use drydock_core::domain::target::Targets;
use drydock_core::dto::push::PushEvent;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::AppState;
use super::signature::{self, SIGNATURE_HEADER};
use crate::scheduler::RunRequest;

/// Largest accepted push payload
pub const MAX_PUSH_BYTES: usize = 25 * 1024 * 1024;

/// Where a push goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Ignore(&'static str),
    Upgrade,
    Build(String),
}

/// Routes a push: trunk only, own source first, then known build sources
pub fn classify(event: &PushEvent, self_repository: Option<&str>, targets: &Targets) -> Route {
    if !event.is_trunk() {
        return Route::Ignore("not a trunk branch");
    }

    let url = event.repository_url();
    if self_repository == Some(url) {
        Route::Upgrade
    } else if targets.has_source(url) {
        Route::Build(url.to_string())
    } else {
        Route::Ignore("unknown repository")
    }
}

/// Any method, any path except /health
pub async fn handle_push(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> StatusCode {
    if method != Method::POST {
        debug!("Ignoring {} request", method);
        return StatusCode::OK;
    }

    let Some(body) = read_body(body, state.body_timeout).await else {
        return StatusCode::OK;
    };

    if let Some(secret) = &state.webhook_secret {
        let provided = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok());
        if let Err(e) = signature::verify(provided, secret, &body) {
            warn!("Rejected push: {}", e);
            return StatusCode::OK;
        }
    }

    let event: PushEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Could not decode push payload: {}", e);
            return StatusCode::OK;
        }
    };

    let targets = state.registry.snapshot();
    match classify(&event, state.self_repository.as_deref(), &targets) {
        Route::Ignore(reason) => {
            debug!("Ignoring push to {} {}: {}", event.repository_url(), event.git_ref, reason);
        }
        Route::Upgrade => {
            info!("Own source changed, requesting upgrade");
            if !state.lifecycle.request_upgrade() {
                debug!("Shutdown already in progress");
            }
        }
        Route::Build(url) => {
            let key = ResourceKey::Build(url);
            match state.scheduler.request_run(&key) {
                RunRequest::Queued | RunRequest::AlreadyPending => {
                    info!("Push to {}, build requested", key.id());
                }
                RunRequest::UnknownResource => {
                    warn!("No worker for {}; it was added after startup", key.id());
                }
                RunRequest::Stopped => debug!("Scheduler stopped, dropping push to {}", key.id()),
            }
        }
    }

    StatusCode::OK
}

/// Reads at most [`MAX_PUSH_BYTES`] within `timeout`
async fn read_body(body: Body, timeout: Duration) -> Option<Bytes> {
    match tokio::time::timeout(timeout, axum::body::to_bytes(body, MAX_PUSH_BYTES)).await {
        Ok(Ok(bytes)) => Some(bytes),
        Ok(Err(e)) => {
            warn!("Could not read push payload: {}", e);
            None
        }
        Err(_) => {
            warn!("Push payload not received within {:?}", timeout);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AppState, create_router};
    use crate::lifecycle::{
        LifecycleController, LifecycleHandle, LifecycleSettings, Relauncher, lifecycle,
    };
    use crate::repository::StaticTargetRegistry;
    use crate::scheduler::{Schedule, SchedulerBuilder, Workers};
    use crate::service::{Pipeline, RunOutcome};
    use crate::testing::ScriptedRunner;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use drydock_core::domain::target::BuildTarget;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    const APP: &str = "git@host:org/app.git";
    const SELF: &str = "git@host:org/drydock.git";

    fn push(git_ref: &str, url: &str) -> PushEvent {
        PushEvent {
            git_ref: git_ref.to_string(),
            repository: drydock_core::dto::push::PushRepository {
                ssh_url: url.to_string(),
            },
        }
    }

    fn targets() -> Targets {
        Targets {
            builds: vec![BuildTarget {
                image_name: "app".to_string(),
                source_url: APP.to_string(),
                subpath: PathBuf::from("."),
                build_file: PathBuf::from("Dockerfile"),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_feature_branch_is_ignored() {
        for url in [APP, SELF] {
            assert!(matches!(
                classify(&push("refs/heads/feature", url), Some(SELF), &targets()),
                Route::Ignore(_)
            ));
        }
    }

    #[test]
    fn test_classify_own_repository_upgrades() {
        assert_eq!(
            classify(&push("refs/heads/master", SELF), Some(SELF), &targets()),
            Route::Upgrade
        );
    }

    #[test]
    fn test_classify_build_source() {
        assert_eq!(
            classify(&push("refs/heads/main", APP), Some(SELF), &targets()),
            Route::Build(APP.to_string())
        );
    }

    #[test]
    fn test_classify_unknown_or_disabled_upgrade() {
        assert!(matches!(
            classify(&push("refs/heads/main", "git@host:org/other.git"), Some(SELF), &targets()),
            Route::Ignore(_)
        ));
        assert!(matches!(
            classify(&push("refs/heads/main", SELF), None, &targets()),
            Route::Ignore(_)
        ));
    }

    struct NeverRelaunch;

    impl Relauncher for NeverRelaunch {
        fn relaunch(&self, _executable: &Path) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Reports every run on a channel
    struct ReportingPipeline(mpsc::UnboundedSender<ResourceKey>);

    #[async_trait]
    impl Pipeline for ReportingPipeline {
        async fn run(&self, resource: &ResourceKey, _cancel: &CancellationToken) -> RunOutcome {
            let _ = self.0.send(resource.clone());
            RunOutcome::Completed {
                succeeded: 1,
                failed: 0,
            }
        }
    }

    struct Fixture {
        router: axum::Router,
        handle: LifecycleHandle,
        // Hold the trigger receiver and the workers alive.
        _controller: LifecycleController,
        _workers: Workers,
        runs: mpsc::UnboundedReceiver<ResourceKey>,
    }

    fn fixture(secret: Option<&str>) -> Fixture {
        let cancel = CancellationToken::new();
        let (tx, runs) = mpsc::unbounded_channel();
        let mut builder = SchedulerBuilder::new(cancel.clone());
        builder
            .add(
                ResourceKey::Build(APP.to_string()),
                Arc::new(ReportingPipeline(tx)),
                Schedule::every(Duration::from_secs(3600)),
            )
            .unwrap();
        let (scheduler, workers) = builder.start();

        let (handle, controller) = lifecycle(
            cancel,
            Arc::new(ScriptedRunner::new()),
            Arc::new(NeverRelaunch),
            LifecycleSettings {
                self_upgrade: None,
                current_executable: PathBuf::from("/bin/true"),
                command_timeout: Duration::from_secs(1),
                shutdown_grace: Duration::from_secs(1),
            },
        );

        let router = create_router(AppState {
            scheduler,
            registry: Arc::new(StaticTargetRegistry::new(targets())),
            lifecycle: handle.clone(),
            self_repository: Some(SELF.to_string()),
            webhook_secret: secret.map(str::to_string),
            body_timeout: Duration::from_millis(300),
        });

        Fixture {
            router,
            handle,
            _controller: controller,
            _workers: workers,
            runs,
        }
    }

    fn post(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn payload(git_ref: &str, url: &str) -> String {
        serde_json::json!({ "ref": git_ref, "repository": { "ssh_url": url } }).to_string()
    }

    #[tokio::test]
    async fn test_push_to_build_source_requests_run() {
        let mut f = fixture(None);
        let response = f
            .router
            .oneshot(post(&payload("refs/heads/main", APP)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let run = tokio::time::timeout(Duration::from_secs(2), f.runs.recv())
            .await
            .unwrap();
        assert_eq!(run, Some(ResourceKey::Build(APP.to_string())));
    }

    #[tokio::test]
    async fn test_push_to_own_source_requests_upgrade() {
        let f = fixture(None);
        let response = f
            .router
            .oneshot(post(&payload("refs/heads/main", SELF)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // The single trigger slot is taken.
        assert!(!f.handle.request_upgrade());
    }

    #[tokio::test]
    async fn test_malformed_payload_answers_ok() {
        let f = fixture(None);
        let response = f.router.oneshot(post("{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(f.handle.request_upgrade());
    }

    #[tokio::test]
    async fn test_get_is_a_no_op() {
        let mut f = fixture(None);
        let request = Request::builder()
            .method("GET")
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let response = f.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(f.runs.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsigned_push_is_ignored_when_secret_set() {
        let f = fixture(Some("s3cret"));
        let response = f
            .router
            .oneshot(post(&payload("refs/heads/main", SELF)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(f.handle.request_upgrade());
    }

    #[tokio::test]
    async fn test_signed_push_is_accepted() {
        let f = fixture(Some("s3cret"));
        let body = payload("refs/heads/main", SELF);
        let request = Request::builder()
            .method("POST")
            .uri("/hooks/push")
            .header(SIGNATURE_HEADER, signature::sign("s3cret", body.as_bytes()))
            .body(Body::from(body))
            .unwrap();

        let response = f.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!f.handle.request_upgrade());
    }

    #[tokio::test]
    async fn test_push_above_default_body_limit_is_handled() {
        let mut f = fixture(None);
        let padding = "x".repeat(3 * 1024 * 1024);
        let body = serde_json::json!({
            "ref": "refs/heads/main",
            "repository": { "ssh_url": APP },
            "commits": [{ "message": padding }],
        })
        .to_string();

        let response = f.router.oneshot(post(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let run = tokio::time::timeout(Duration::from_secs(2), f.runs.recv())
            .await
            .unwrap();
        assert_eq!(run, Some(ResourceKey::Build(APP.to_string())));
    }

    #[tokio::test]
    async fn test_oversized_push_answers_ok() {
        let f = fixture(None);
        let body = "x".repeat(MAX_PUSH_BYTES + 1);
        let response = f.router.oneshot(post(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(f.handle.request_upgrade());
    }

    #[tokio::test]
    async fn test_stalled_body_answers_ok() {
        let f = fixture(None);
        let stalled = futures::stream::pending::<Result<Bytes, std::io::Error>>();
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::from_stream(stalled))
            .unwrap();

        let response = tokio::time::timeout(Duration::from_secs(5), f.router.oneshot(request))
            .await
            .expect("stalled body was not timed out")
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(f.handle.request_upgrade());
    }

    #[tokio::test]
    async fn test_health_reports_state() {
        let f = fixture(None);
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = f.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"running");
    }
}
