use crate::config::{Config, FailurePolicy, UpstreamConfig};
use crate::errors::ProxyError;
use crate::intercept::match_route;
use crate::metrics_defs::{INTERCEPT_FAILURES, REQUEST_DURATION, REQUESTS_INFLIGHT};
use crate::rewrite::{build_target_url, rewrite_path};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST};
use http::request::Parts;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::service::Service;
use hyper::{Request, Response};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use shared::http::{filter_hop_by_hop, make_error_response};
use shared::{counter, gauge, histogram};
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use usersync::{Orchestrator, Trigger};

struct ProxyState {
    client: Client<HttpConnector, Full<Bytes>>,
    upstream: UpstreamConfig,
    legacy_prefix: String,
    failure_policy: FailurePolicy,
    orchestrator: Arc<Orchestrator>,
}

/// One slot of the in-flight gauge. Released on drop, so requests abandoned by the client
/// mid-sync are still counted out.
struct InflightGuard;

impl InflightGuard {
    fn acquire() -> Self {
        gauge!(REQUESTS_INFLIGHT).increment(1.0);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}

/// Forwards every request to the upstream backend. Requests to the intercepted routes run
/// their sync first.
#[derive(Clone)]
pub struct ProxyService {
    state: Arc<ProxyState>,
}

impl ProxyService {
    pub fn new(config: &Config, orchestrator: Arc<Orchestrator>) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.upstream.connect_timeout()));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(config.upstream.pool_idle_timeout())
            .pool_max_idle_per_host(config.upstream.pool_max_idle_per_host)
            .build(connector);

        Self {
            state: Arc::new(ProxyState {
                client,
                upstream: config.upstream.clone(),
                legacy_prefix: config.legacy_prefix.clone(),
                failure_policy: config.failure_policy,
                orchestrator,
            }),
        }
    }

    /// Handles one inbound request. Errors are turned into status responses here.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<BoxBody<Bytes, ProxyError>>
    where
        B: Body,
        B::Error: Display,
    {
        let start = Instant::now();
        let _inflight = InflightGuard::acquire();

        let method = req.method().clone();
        let original_path = req.uri().path().to_string();
        let query = req.uri().query().map(str::to_string);
        let rewritten = rewrite_path(&self.state.legacy_prefix, &original_path).to_string();
        let trigger = match_route(&method, &rewritten);

        tracing::info!(
            %method,
            path = %original_path,
            rewritten = %rewritten,
            intercepted = trigger.map(|t| t.as_str()),
            "Received request"
        );

        let response = match self
            .forward(req, &rewritten, query.as_deref(), trigger)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(%method, path = %original_path, error = %e, "Request failed");
                make_error_response(e.status_code())
            }
        };

        histogram!(
            REQUEST_DURATION,
            "status" => response.status().as_str().to_string(),
            "intercepted" => if trigger.is_some() { "true" } else { "false" }
        )
        .record(start.elapsed().as_secs_f64());

        response
    }

    async fn forward<B>(
        &self,
        req: Request<B>,
        path: &str,
        query: Option<&str>,
        trigger: Option<Trigger>,
    ) -> Result<Response<BoxBody<Bytes, ProxyError>>, ProxyError>
    where
        B: Body,
        B::Error: Display,
    {
        let target = build_target_url(&self.state.upstream.url, path, query)?;

        let (parts, body) = req.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| ProxyError::RequestBody(e.to_string()))?
            .to_bytes();

        if let Some(trigger) = trigger {
            self.intercept(trigger, &parts, &body).await?;
        }

        let mut headers = parts.headers;
        filter_hop_by_hop(&mut headers, parts.version);
        headers.remove(HOST);

        let mut upstream_request = Request::new(Full::new(body));
        *upstream_request.method_mut() = parts.method;
        *upstream_request.uri_mut() = target.clone();
        *upstream_request.headers_mut() = headers;

        let start = Instant::now();
        let timeout = self.state.upstream.request_timeout();
        let response = tokio::time::timeout(timeout, self.state.client.request(upstream_request))
            .await
            .map_err(|_| ProxyError::UpstreamTimeout(timeout))??;

        let (mut parts, body) = response.into_parts();
        filter_hop_by_hop(&mut parts.headers, parts.version);

        tracing::info!(
            %target,
            status = %parts.status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Forwarded request"
        );

        Ok(Response::from_parts(
            parts,
            body.map_err(ProxyError::from).boxed(),
        ))
    }

    async fn intercept(
        &self,
        trigger: Trigger,
        parts: &Parts,
        body: &Bytes,
    ) -> Result<(), ProxyError> {
        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());

        let err = match self.state.orchestrator.handle(trigger, content_type, body).await {
            Ok(report) => {
                tracing::info!(
                    trigger = trigger.as_str(),
                    users = report.users,
                    accepted = report.accepted,
                    rejected = report.rejected,
                    "Sync completed"
                );
                return Ok(());
            }
            Err(e) => e,
        };

        let policy = match self.state.failure_policy {
            FailurePolicy::Reject => "reject",
            FailurePolicy::Forward => "forward",
        };
        counter!(
            INTERCEPT_FAILURES,
            "trigger" => trigger.as_str(),
            "kind" => err.kind().as_str(),
            "policy" => policy
        )
        .increment(1);

        match self.state.failure_policy {
            FailurePolicy::Reject => Err(err.into()),
            FailurePolicy::Forward => {
                tracing::warn!(
                    trigger = trigger.as_str(),
                    error = %err,
                    "Sync failed, forwarding anyway"
                );
                Ok(())
            }
        }
    }
}

impl Service<Request<Incoming>> for ProxyService {
    type Response = Response<BoxBody<Bytes, ProxyError>>;
    type Error = ProxyError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(req).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Listener;
    use http::header::{CONNECTION, COOKIE, SET_COOKIE};
    use http::{HeaderMap, Method, StatusCode};
    use metrics::{Key, KeyName, Metadata, SharedString, Unit};
    use registry::testutils::InMemoryRegistry;
    use registry::types::Application;
    use shared::testutils::spawn_test_server;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::time::Duration;
    use usersync::client::SyncClient;
    use usersync::config::MirrorConfig;
    use usersync::mirror::{MirrorStore, SqliteMirrorStore};
    use url::Url;

    #[derive(Debug)]
    struct Captured {
        method: Method,
        uri: String,
        headers: HeaderMap,
        body: Bytes,
    }

    type Log = Arc<Mutex<Vec<&'static str>>>;

    struct Fixture {
        _dir: tempfile::TempDir,
        registry: Arc<InMemoryRegistry>,
        mirror: Arc<SqliteMirrorStore>,
        log: Log,
        captured: Arc<Mutex<Vec<Captured>>>,
        upstream: SocketAddr,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mirror = Arc::new(
                SqliteMirrorStore::open(&MirrorConfig {
                    path: dir.path().join("mirror.db"),
                    max_connections: 2,
                })
                .await
                .unwrap(),
            );
            let log: Log = Arc::default();
            let captured: Arc<Mutex<Vec<Captured>>> = Arc::default();

            let (log_clone, captured_clone) = (log.clone(), captured.clone());
            let upstream = spawn_test_server(move |req: Request<Incoming>| {
                let (log, captured) = (log_clone.clone(), captured_clone.clone());
                async move {
                    let (parts, body) = req.into_parts();
                    let body = body.collect().await?.to_bytes();
                    log.lock().unwrap().push("upstream");
                    captured.lock().unwrap().push(Captured {
                        method: parts.method,
                        uri: parts.uri.to_string(),
                        headers: parts.headers,
                        body,
                    });

                    let mut response = Response::new(Full::new(Bytes::from_static(b"backend ok")));
                    *response.status_mut() = StatusCode::CREATED;
                    response
                        .headers_mut()
                        .append(SET_COOKIE, "a=1".parse().unwrap());
                    response
                        .headers_mut()
                        .append(SET_COOKIE, "b=2".parse().unwrap());
                    Ok::<_, hyper::Error>(response)
                }
            })
            .await;

            Fixture {
                _dir: dir,
                registry: Arc::new(InMemoryRegistry::new()),
                mirror,
                log,
                captured,
                upstream,
            }
        }

        /// Registers application `id` backed by a downstream server answering `body`.
        async fn add_downstream(&self, id: u64, body: &'static str) {
            let log = self.log.clone();
            let addr = spawn_test_server(move |_req| {
                log.lock().unwrap().push("downstream");
                async move {
                    Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(
                        body.as_bytes(),
                    ))))
                }
            })
            .await;
            self.registry
                .insert_application(Application::new(id, id * 100, format!("http://{addr}/sync")));
        }

        fn config(&self, upstream: SocketAddr, failure_policy: FailurePolicy) -> Config {
            let listener = Listener {
                host: "127.0.0.1".into(),
                port: 1,
            };
            Config {
                listener: listener.clone(),
                admin_listener: listener,
                upstream: UpstreamConfig {
                    request_timeout_secs: 1,
                    ..UpstreamConfig::new(Url::parse(&format!("http://{upstream}")).unwrap())
                },
                legacy_prefix: "/prod".into(),
                failure_policy,
            }
        }

        fn service(&self, failure_policy: FailurePolicy) -> ProxyService {
            self.service_for(self.upstream, failure_policy)
        }

        fn service_for(&self, upstream: SocketAddr, failure_policy: FailurePolicy) -> ProxyService {
            let orchestrator = Orchestrator::new(
                self.registry.clone(),
                self.mirror.clone(),
                SyncClient::new(Duration::from_secs(5)),
            );
            ProxyService::new(&self.config(upstream, failure_policy), Arc::new(orchestrator))
        }

        fn log(&self) -> Vec<&'static str> {
            self.log.lock().unwrap().clone()
        }
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json;charset=UTF-8")
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    }

    fn organization_user(sync_flag: u8) -> serde_json::Value {
        serde_json::json!({
            "userName": "zhangsan",
            "name": "Zhang San",
            "mobile": "13800000000",
            "email": "zs@example.com",
            "password": "secret",
            "confirmPassword": "secret",
            "departmentId": "5",
            "appIdList": ["1"],
            "syncFlag": sync_flag,
            "checkFlag": 0
        })
    }

    const ACCEPT: &str = r#"{"code": 1, "data": [{"userName": "zhangsan", "userId": "501"}]}"#;

    /// Tracks the in-flight gauge and its peak, ignores every other metric.
    #[derive(Default)]
    struct InflightGauge(Mutex<(f64, f64)>);

    impl InflightGauge {
        fn current(&self) -> f64 {
            self.0.lock().unwrap().0
        }

        fn peak(&self) -> f64 {
            self.0.lock().unwrap().1
        }
    }

    impl metrics::GaugeFn for InflightGauge {
        fn increment(&self, value: f64) {
            let mut state = self.0.lock().unwrap();
            state.0 += value;
            state.1 = state.1.max(state.0);
        }

        fn decrement(&self, value: f64) {
            self.0.lock().unwrap().0 -= value;
        }

        fn set(&self, value: f64) {
            self.0.lock().unwrap().0 = value;
        }
    }

    struct InflightRecorder(Arc<InflightGauge>);

    impl metrics::Recorder for InflightRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, _: &Key, _: &Metadata<'_>) -> metrics::Counter {
            metrics::Counter::noop()
        }

        fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> metrics::Gauge {
            if key.name() == REQUESTS_INFLIGHT.name {
                metrics::Gauge::from_arc(self.0.clone())
            } else {
                metrics::Gauge::noop()
            }
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> metrics::Histogram {
            metrics::Histogram::noop()
        }
    }

    #[tokio::test]
    async fn test_forward_passthrough() {
        let fixture = Fixture::new().await;
        let service = fixture.service(FailurePolicy::Reject);

        let req = Request::builder()
            .method(Method::GET)
            .uri("/prod/api/list?page=2&q=%20x")
            .header(COOKIE, "session=abc")
            .header(COOKIE, "theme=dark")
            .header(CONNECTION, "x-hop")
            .header("x-hop", "dropped")
            .header(HOST, "gateway.example.com")
            .header("x-request-id", "r-1")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let response = service.handle(req).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let cookies: Vec<_> = response.headers().get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"backend ok");

        let captured = fixture.captured.lock().unwrap();
        let request = &captured[0];
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.uri, "/api/list?page=2&q=%20x");
        let cookies: Vec<_> = request.headers.get_all(COOKIE).iter().collect();
        assert_eq!(cookies, vec!["session=abc", "theme=dark"]);
        assert_eq!(request.headers["x-request-id"], "r-1");
        assert!(request.headers.get("x-hop").is_none());
        assert!(request.headers.get(CONNECTION).is_none());
        // Host comes from the target URL
        assert_eq!(request.headers[HOST], fixture.upstream.to_string());
    }

    #[tokio::test]
    async fn test_sync_flag_zero_forwards_without_calls() {
        let fixture = Fixture::new().await;
        fixture.add_downstream(1, ACCEPT).await;
        let service = fixture.service(FailurePolicy::Reject);

        let body = organization_user(0);
        let response = service
            .handle(post_json("/prod/organization/user", body.clone()))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(fixture.log(), vec!["upstream"]);

        let captured = fixture.captured.lock().unwrap();
        assert_eq!(captured[0].uri, "/organization/user");
        // The backend receives the body untouched, password fields included
        let forwarded: serde_json::Value = serde_json::from_slice(&captured[0].body).unwrap();
        assert_eq!(forwarded, body);
    }

    #[tokio::test]
    async fn test_sync_flag_zero_ignores_malformed_ids() {
        let fixture = Fixture::new().await;
        let service = fixture.service(FailurePolicy::Reject);

        let mut body = organization_user(0);
        body["appIdList"] = serde_json::json!([""]);
        let response = service
            .handle(post_json("/prod/organization/user", body))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(fixture.log(), vec!["upstream"]);

        let body = serde_json::json!({"appIdList": ["x"], "userIdList": [""], "syncFlag": 0});
        let response = service.handle(post_json("/prod/user/app/grant", body)).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(fixture.log(), vec!["upstream", "upstream"]);
    }

    #[tokio::test]
    async fn test_rejection_with_blank_remote_id_forwards() {
        let fixture = Fixture::new().await;
        fixture
            .add_downstream(1, r#"{"code": 0, "data": [{"userName": "zhangsan", "userId": ""}]}"#)
            .await;
        let service = fixture.service(FailurePolicy::Reject);

        let response = service
            .handle(post_json("/prod/organization/user", organization_user(1)))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(fixture.log(), vec!["downstream", "upstream"]);

        let rows = fixture.mirror.records_by_user_name("zhangsan").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record.app_user_id, None);
    }

    #[tokio::test]
    async fn test_inflight_released_when_request_abandoned() {
        let gauge = Arc::new(InflightGauge::default());
        let recorder = InflightRecorder(gauge.clone());
        let _recorder = metrics::set_default_local_recorder(&recorder);

        let fixture = Fixture::new().await;
        let slow = spawn_test_server(|_req| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(ACCEPT.as_bytes()))))
        })
        .await;
        fixture
            .registry
            .insert_application(Application::new(1, 100, format!("http://{slow}/sync")));
        let service = fixture.service(FailurePolicy::Reject);

        // The caller goes away while the sync still waits on the downstream application
        let pending = service.handle(post_json("/prod/organization/user", organization_user(1)));
        assert!(
            tokio::time::timeout(Duration::from_millis(200), pending)
                .await
                .is_err()
        );
        assert_eq!(gauge.peak(), 1.0);
        assert_eq!(gauge.current(), 0.0);

        let response = service.handle(Request::new(Full::new(Bytes::new()))).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(gauge.current(), 0.0);
    }

    #[tokio::test]
    async fn test_sync_runs_before_forwarding() {
        let fixture = Fixture::new().await;
        fixture.add_downstream(1, ACCEPT).await;
        let service = fixture.service(FailurePolicy::Reject);

        let response = service
            .handle(post_json("/prod/organization/user", organization_user(1)))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(fixture.log(), vec!["downstream", "upstream"]);

        let rows = fixture.mirror.records_by_user_name("zhangsan").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record.app_user_id, Some(501));
    }

    #[tokio::test]
    async fn test_grant_route() {
        let fixture = Fixture::new().await;
        fixture.add_downstream(1, ACCEPT).await;
        fixture.registry.insert_user(registry::types::User {
            id: 3,
            user_name: "zhangsan".into(),
            name: "Zhang San".into(),
            mobile: "13800000000".into(),
            email: "zs@example.com".into(),
        });
        let service = fixture.service(FailurePolicy::Reject);

        let body = serde_json::json!({"appIdList": ["1"], "userIdList": ["3"], "syncFlag": 1});
        let response = service.handle(post_json("/user/app/grant", body)).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(fixture.log(), vec!["downstream", "upstream"]);
        assert_eq!(fixture.mirror.records_by_user_id(3).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reject_policy() {
        let fixture = Fixture::new().await;
        let service = fixture.service(FailurePolicy::Reject);

        // Application 1 is not registered
        let response = service
            .handle(post_json("/prod/organization/user", organization_user(1)))
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let mut req = post_json("/prod/organization/user", organization_user(1));
        req.headers_mut()
            .insert(CONTENT_TYPE, "text/plain".parse().unwrap());
        let response = service.handle(req).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        fixture.add_downstream(2, "not json").await;
        let mut body = organization_user(1);
        body["appIdList"] = serde_json::json!(["2"]);
        let response = service.handle(post_json("/organization/user", body)).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        assert!(fixture.captured.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forward_policy() {
        let fixture = Fixture::new().await;
        let service = fixture.service(FailurePolicy::Forward);

        let response = service
            .handle(post_json("/prod/organization/user", organization_user(1)))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(fixture.log(), vec!["upstream"]);
        assert!(!fixture.mirror.user_name_exists("zhangsan").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_path() {
        let fixture = Fixture::new().await;
        let service = fixture.service(FailurePolicy::Reject);

        let req = Request::builder()
            .uri("/prod/bad%zzpath")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = service.handle(req).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(fixture.captured.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_failures() {
        let fixture = Fixture::new().await;

        // Nothing listens on a released port
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let closed = listener.local_addr().unwrap();
        drop(listener);
        let service = fixture.service_for(closed, FailurePolicy::Reject);
        let req = Request::new(Full::new(Bytes::new()));
        assert_eq!(service.handle(req).await.status(), StatusCode::BAD_GATEWAY);

        let slow = spawn_test_server(|_req| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::new())))
        })
        .await;
        let service = fixture.service_for(slow, FailurePolicy::Reject);
        let req = Request::new(Full::new(Bytes::new()));
        assert_eq!(
            service.handle(req).await.status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[tokio::test]
    async fn test_served_over_http() {
        let fixture = Fixture::new().await;
        let service = fixture.service(FailurePolicy::Reject);
        let proxy = spawn_test_server(move |req| {
            let service = service.clone();
            async move { service.call(req).await }
        })
        .await;

        let response = reqwest::Client::new()
            .post(format!("http://{proxy}/prod/echo?x=1"))
            .body("payload")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        assert_eq!(response.text().await.unwrap(), "backend ok");

        let captured = fixture.captured.lock().unwrap();
        assert_eq!(captured[0].uri, "/echo?x=1");
        assert_eq!(captured[0].body.as_ref(), b"payload");
    }
}
