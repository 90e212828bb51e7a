use std::num::NonZeroU64;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use http::HeaderValue;
use http::Request;
use http::Response;
use http::StatusCode;
use load_limit::LimitError;
use load_limit::LoadLimiter;
use load_limit::SubmitResult;
use load_limit::TenantLimiter;
use quanta::Clock;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceBuilder;
use tower::ServiceExt;

use super::*;

use futures::FutureExt;
use futures::future::Ready;
use futures::future::ready;

#[derive(Clone)]
struct MockService {
    pub count: Arc<AtomicUsize>,
}

impl MockService {
    fn new() -> Self {
        Self {
            count: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn calls(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Service<Request<String>> for MockService {
    type Response = Response<String>;
    type Error = BoxError;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: Request<String>) -> Self::Future {
        self.count.fetch_add(1, Ordering::SeqCst);
        ready(Ok(Response::new("ok".to_string())))
    }
}

// A limiter that always answers the same thing and remembers what it was asked
#[derive(Debug)]
struct ScriptedLimiter {
    outcome: Result<SubmitResult, LimitError>,
    submissions: Mutex<Vec<(String, u64)>>,
}

impl ScriptedLimiter {
    fn new(outcome: Result<SubmitResult, LimitError>) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            submissions: Mutex::new(Vec::new()),
        })
    }

    fn accepting() -> Arc<Self> {
        Self::new(Ok(SubmitResult::accept()))
    }

    fn submissions(&self) -> Vec<(String, u64)> {
        self.submissions.lock().unwrap().clone()
    }
}

impl LoadLimiter for ScriptedLimiter {
    fn submit(&self, tenant_key: &str, load: u64) -> Result<SubmitResult, LimitError> {
        self.submissions
            .lock()
            .unwrap()
            .push((tenant_key.to_owned(), load));
        self.outcome.clone()
    }
}

// Counts which of the three paths ran
#[derive(Debug, Default)]
struct Fired {
    accept: AtomicUsize,
    abort: AtomicUsize,
    error: AtomicUsize,
}

impl Fired {
    fn counts(&self) -> (usize, usize, usize) {
        (
            self.accept.load(Ordering::SeqCst),
            self.abort.load(Ordering::SeqCst),
            self.error.load(Ordering::SeqCst),
        )
    }
}

fn request_from(ip: &str) -> Request<String> {
    Request::builder()
        .uri("/")
        .header("x-forwarded-for", ip)
        .body(String::new())
        .unwrap()
}

async fn send<S>(svc: &mut S, req: Request<String>) -> Result<Response<String>, BoxError>
where
    S: Service<Request<String>, Response = Response<String>, Error = BoxError>,
{
    svc.ready().await?.call(req).await
}

fn per_ip(limiter: Arc<dyn LoadLimiter>, load: u64) -> LoadLimitMiddleware {
    LoadLimitMiddleware::new(
        LoadLimitConfig::new()
            .with_limiter(limiter)
            .with_default_route_load(load)
            .with_tenant_key_fn(tenant::client_ip()),
    )
}

fn observed(config: LoadLimitConfig, fired: &Arc<Fired>) -> LoadLimitMiddleware {
    let (on_accept, on_abort, on_error) = (fired.clone(), fired.clone(), fired.clone());
    LoadLimitMiddleware::new(
        config
            .with_accept_handler(move |ctx, _result| {
                on_accept.accept.fetch_add(1, Ordering::SeqCst);
                ctx.next()
            })
            .with_abort_handler(move |ctx, _result| {
                on_abort.abort.fetch_add(1, Ordering::SeqCst);
                ctx.abort_with_status(StatusCode::TOO_MANY_REQUESTS)
            })
            .with_error_handler(move |ctx, _err| {
                on_error.error.fetch_add(1, Ordering::SeqCst);
                ctx.abort_with_status(StatusCode::INTERNAL_SERVER_ERROR)
            }),
    )
}

mod configuration {
    use super::*;

    #[test]
    fn it_requires_a_limiter() {
        let middleware =
            LoadLimitMiddleware::new(LoadLimitConfig::new().with_tenant_key("global"));
        assert_eq!(
            middleware.try_default_layer().unwrap_err(),
            ConfigError::MissingLimiter
        );
    }

    #[test]
    fn it_requires_a_tenant_source() {
        let middleware = LoadLimitMiddleware::new(
            LoadLimitConfig::new().with_limiter(ScriptedLimiter::accepting()),
        );
        assert_eq!(
            middleware.try_default_layer().unwrap_err(),
            ConfigError::MissingTenantKey
        );
    }

    #[test]
    fn it_rejects_both_tenant_sources() {
        let middleware = LoadLimitMiddleware::new(
            LoadLimitConfig::new()
                .with_limiter(ScriptedLimiter::accepting())
                .with_tenant_key("global")
                .with_tenant_key_fn(tenant::client_ip()),
        );
        assert_eq!(
            middleware.try_with_load(5).unwrap_err(),
            ConfigError::AmbiguousTenantKey
        );
    }

    #[test]
    fn it_treats_an_empty_tenant_key_as_unset() {
        let alone = LoadLimitMiddleware::new(
            LoadLimitConfig::new()
                .with_limiter(ScriptedLimiter::accepting())
                .with_tenant_key(""),
        );
        assert_eq!(
            alone.try_default_layer().unwrap_err(),
            ConfigError::MissingTenantKey
        );

        let with_fn = LoadLimitMiddleware::new(
            LoadLimitConfig::new()
                .with_limiter(ScriptedLimiter::accepting())
                .with_tenant_key("")
                .with_tenant_key_fn(tenant::client_ip()),
        );
        assert!(with_fn.try_default_layer().is_ok());
    }

    #[tokio::test]
    async fn it_resolves_per_request_when_the_fixed_key_is_empty() {
        let limiter = ScriptedLimiter::accepting();
        let middleware = LoadLimitMiddleware::new(
            LoadLimitConfig::new()
                .with_limiter(limiter.clone())
                .with_default_route_load(1)
                .with_tenant_key("")
                .with_tenant_key_fn(tenant::client_ip()),
        );
        let mut svc = middleware.default_layer().layer(MockService::new());

        send(&mut svc, request_from("10.0.0.1")).await.unwrap();
        assert_eq!(limiter.submissions(), vec![("10.0.0.1".to_string(), 1)]);
    }

    #[test]
    #[should_panic(expected = "limiter is required")]
    fn it_refuses_to_install_an_invalid_configuration() {
        let middleware =
            LoadLimitMiddleware::new(LoadLimitConfig::new().with_tenant_key("global"));
        let _ = middleware.with_load(1);
    }

    #[tokio::test]
    async fn it_never_reaches_the_limiter_when_invalid() {
        let limiter = ScriptedLimiter::accepting();
        let middleware = LoadLimitMiddleware::new(
            LoadLimitConfig::new()
                .with_limiter(limiter.clone())
                .with_default_route_load(1),
        );

        assert!(middleware.try_default_layer().is_err());
        assert!(limiter.submissions().is_empty());
    }
}

mod admission {
    use super::*;

    #[tokio::test]
    async fn test_zero_load_skips_the_limiter() {
        let limiter = ScriptedLimiter::new(Ok(SubmitResult::reject(None)));
        let mock = MockService::new();
        let mut svc = per_ip(limiter.clone(), 0).default_layer().layer(mock.clone());

        for _ in 0..5 {
            let res = send(&mut svc, request_from("10.0.0.1")).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }

        assert!(limiter.submissions().is_empty());
        assert_eq!(mock.calls(), 5);
    }

    #[tokio::test]
    async fn test_zero_load_skips_tenant_resolution() {
        let limiter = ScriptedLimiter::accepting();
        let fired = Arc::new(Fired::default());
        let middleware = observed(
            LoadLimitConfig::new()
                .with_limiter(limiter.clone())
                .with_tenant_key_fn(|_ctx| Err("unreachable".into())),
            &fired,
        );
        let mock = MockService::new();
        let mut svc = middleware.default_layer().layer(mock.clone());

        let res = send(&mut svc, request_from("10.0.0.1")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(fired.counts(), (0, 0, 0));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_accepted_requests_continue() {
        let limiter = ScriptedLimiter::accepting();
        let mock = MockService::new();
        let mut svc = per_ip(limiter.clone(), 3).default_layer().layer(mock.clone());

        let res = send(&mut svc, request_from("10.0.0.1")).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body(), "ok");
        assert_eq!(limiter.submissions(), vec![("10.0.0.1".to_string(), 3)]);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_huge_load_is_submitted_unchanged() {
        let limiter = ScriptedLimiter::accepting();
        let mut svc = per_ip(limiter.clone(), u64::MAX)
            .default_layer()
            .layer(MockService::new());

        let res = send(&mut svc, request_from("10.0.0.1")).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            limiter.submissions(),
            vec![("10.0.0.1".to_string(), u64::MAX)]
        );
    }

    #[tokio::test]
    async fn test_default_rejection_with_retry_hint() {
        let limiter =
            ScriptedLimiter::new(Ok(SubmitResult::reject(Some(Duration::from_millis(1250)))));
        let mock = MockService::new();
        let mut svc = per_ip(limiter, 1).default_layer().layer(mock.clone());

        let res = send(&mut svc, request_from("10.0.0.1")).await.unwrap();

        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers()[X_RETRY_IN], "1250");
        assert!(res.body().is_empty());
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_default_rejection_without_retry_hint() {
        let limiter = ScriptedLimiter::new(Ok(SubmitResult::reject(None)));
        let mock = MockService::new();
        let mut svc = per_ip(limiter, 1).default_layer().layer(mock.clone());

        let res = send(&mut svc, request_from("10.0.0.1")).await.unwrap();

        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(res.headers().get(X_RETRY_IN).is_none());
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_fixed_tenant_key_charges_everyone_together() {
        let limiter = ScriptedLimiter::accepting();
        let middleware = LoadLimitMiddleware::new(
            LoadLimitConfig::new()
                .with_limiter(limiter.clone())
                .with_default_route_load(2)
                .with_tenant_key("global"),
        );
        let mut svc = middleware.default_layer().layer(MockService::new());

        send(&mut svc, request_from("10.0.0.1")).await.unwrap();
        send(&mut svc, request_from("10.0.0.2")).await.unwrap();

        assert_eq!(
            limiter.submissions(),
            vec![("global".to_string(), 2), ("global".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn test_empty_tenant_key_is_a_tenant() {
        let limiter = ScriptedLimiter::accepting();
        let middleware = LoadLimitMiddleware::new(
            LoadLimitConfig::new()
                .with_limiter(limiter.clone())
                .with_default_route_load(1)
                .with_tenant_key_fn(|_ctx| Ok(String::new())),
        );
        let mut svc = middleware.default_layer().layer(MockService::new());

        let res = send(&mut svc, request_from("10.0.0.1")).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(limiter.submissions(), vec![(String::new(), 1)]);
    }
}

mod handlers {
    use super::*;

    #[tokio::test]
    async fn test_accept_handler_owns_the_outcome() {
        let middleware = LoadLimitMiddleware::new(
            LoadLimitConfig::new()
                .with_limiter(ScriptedLimiter::accepting())
                .with_default_route_load(1)
                .with_tenant_key("global")
                .with_accept_handler(|ctx, _result| ctx.abort_with_status(StatusCode::ACCEPTED)),
        );
        let mock = MockService::new();
        let mut svc = middleware.default_layer().layer(mock.clone());

        let res = send(&mut svc, request_from("10.0.0.1")).await.unwrap();

        // No implicit continuation after a custom accept handler
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_accept_handler_headers_reach_the_inner_response() {
        let middleware = LoadLimitMiddleware::new(
            LoadLimitConfig::new()
                .with_limiter(ScriptedLimiter::accepting())
                .with_default_route_load(1)
                .with_tenant_key("global")
                .with_accept_handler(|ctx, result| {
                    ctx.set_header("x-accepted", HeaderValue::from_static("yes"));
                    assert!(result.accepted);
                    ctx.next()
                }),
        );
        let mock = MockService::new();
        let mut svc = middleware.default_layer().layer(mock.clone());

        let res = send(&mut svc, request_from("10.0.0.1")).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["x-accepted"], "yes");
        assert_eq!(res.body(), "ok");
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_abort_handler_replaces_default_rejection() {
        let limiter =
            ScriptedLimiter::new(Ok(SubmitResult::reject(Some(Duration::from_secs(2)))));
        let middleware = LoadLimitMiddleware::new(
            LoadLimitConfig::new()
                .with_limiter(limiter)
                .with_default_route_load(1)
                .with_tenant_key_fn(tenant::client_ip())
                .with_abort_handler(|ctx, result| {
                    let secs = result.retry_in.as_secs();
                    ctx.set_header(http::header::RETRY_AFTER, HeaderValue::from(secs));
                    ctx.abort_with_response(
                        Response::builder()
                            .status(StatusCode::SERVICE_UNAVAILABLE)
                            .body("busy".to_string())
                            .unwrap(),
                    )
                }),
        );
        let mut svc = middleware.default_layer().layer(MockService::new());

        let res = send(&mut svc, request_from("10.0.0.1")).await.unwrap();

        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(res.headers()[http::header::RETRY_AFTER], "2");
        assert!(res.headers().get(X_RETRY_IN).is_none());
        assert_eq!(res.body(), "busy");
    }

    #[tokio::test]
    async fn test_tenant_key_failure_propagates_by_default() {
        let limiter = ScriptedLimiter::accepting();
        let mock = MockService::new();
        let mut svc = per_ip(limiter.clone(), 1).default_layer().layer(mock.clone());

        // No forwarding header and no peer address: nobody to charge
        let req = Request::builder().body(String::new()).unwrap();
        let err = send(&mut svc, req).await.unwrap_err();

        let gate_err = err.downcast_ref::<GateError>().expect("a GateError");
        assert!(matches!(gate_err, GateError::TenantKey(_)));
        assert!(limiter.submissions().is_empty());
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_submit_failure_propagates_by_default() {
        let limiter = ScriptedLimiter::new(Err(LimitError::TenantCapacity { max_tenants: 1 }));
        let mock = MockService::new();
        let mut svc = per_ip(limiter, 1).default_layer().layer(mock.clone());

        let err = send(&mut svc, request_from("10.0.0.1")).await.unwrap_err();

        let gate_err = err.downcast_ref::<GateError>().expect("a GateError");
        assert!(matches!(
            gate_err,
            GateError::Submit(LimitError::TenantCapacity { max_tenants: 1 })
        ));
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_error_handler_answers_instead() {
        let limiter = ScriptedLimiter::new(Err(LimitError::TenantCapacity { max_tenants: 1 }));
        let middleware = LoadLimitMiddleware::new(
            LoadLimitConfig::new()
                .with_limiter(limiter)
                .with_default_route_load(1)
                .with_tenant_key("global")
                .with_error_handler(|ctx, err| {
                    ctx.abort_with_response(
                        Response::builder()
                            .status(StatusCode::INTERNAL_SERVER_ERROR)
                            .body(err.to_string())
                            .unwrap(),
                    )
                }),
        );
        let mut svc = middleware.default_layer().layer(MockService::new());

        let res = send(&mut svc, request_from("10.0.0.1")).await.unwrap();

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(res.body().starts_with("error submitting load request"));
    }

    #[tokio::test]
    async fn test_exactly_one_path_fires() {
        let cases: Vec<(Result<SubmitResult, LimitError>, bool, (usize, usize, usize))> = vec![
            (Ok(SubmitResult::accept()), false, (1, 0, 0)),
            (Ok(SubmitResult::reject(None)), false, (0, 1, 0)),
            (
                Ok(SubmitResult::reject(Some(Duration::from_secs(1)))),
                false,
                (0, 1, 0),
            ),
            (
                Err(LimitError::TenantCapacity { max_tenants: 0 }),
                false,
                (0, 0, 1),
            ),
            // Resolution fails before the limiter could answer anything
            (Ok(SubmitResult::accept()), true, (0, 0, 1)),
        ];

        for (outcome, key_fails, expected) in cases {
            let fired = Arc::new(Fired::default());
            let config = LoadLimitConfig::new()
                .with_limiter(ScriptedLimiter::new(outcome.clone()))
                .with_default_route_load(1)
                .with_tenant_key_fn(move |ctx| {
                    if key_fails {
                        Err("no tenant".into())
                    } else {
                        tenant::client_ip()(ctx)
                    }
                });
            let mut svc = observed(config, &fired)
                .default_layer()
                .layer(MockService::new());

            let res = send(&mut svc, request_from("10.0.0.1")).await;
            assert!(res.is_ok(), "every path is handled");
            assert_eq!(fired.counts(), expected, "outcome {:?}", outcome);
        }
    }
}

mod specialization {
    use super::*;

    #[tokio::test]
    async fn test_specializations_are_independent() {
        let limiter = ScriptedLimiter::accepting();
        let parent = per_ip(limiter.clone(), 1);

        let heavy = parent.specialize(10);
        let free = parent.specialize(0);

        assert_eq!(parent.load(), 1);
        assert_eq!(heavy.load(), 10);
        assert_eq!(free.load(), 0);

        let mut parent_svc = parent.default_layer().layer(MockService::new());
        let mut heavy_svc = heavy.default_layer().layer(MockService::new());
        let mut free_svc = free.default_layer().layer(MockService::new());

        send(&mut heavy_svc, request_from("10.0.0.1")).await.unwrap();
        send(&mut free_svc, request_from("10.0.0.1")).await.unwrap();
        send(&mut parent_svc, request_from("10.0.0.1")).await.unwrap();

        assert_eq!(
            limiter.submissions(),
            vec![("10.0.0.1".to_string(), 10), ("10.0.0.1".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_with_load_shares_handlers_and_limiter() {
        let limiter =
            ScriptedLimiter::new(Ok(SubmitResult::reject(Some(Duration::from_millis(5)))));
        let fired = Arc::new(Fired::default());
        let parent = observed(
            LoadLimitConfig::new()
                .with_limiter(limiter.clone())
                .with_default_route_load(1)
                .with_tenant_key("global"),
            &fired,
        );

        let mut svc = ServiceBuilder::new()
            .load_limit_with(&parent, 7)
            .service(MockService::new());
        send(&mut svc, request_from("10.0.0.1")).await.unwrap();

        let mut svc = ServiceBuilder::new()
            .load_limit(&parent)
            .service(MockService::new());
        send(&mut svc, request_from("10.0.0.1")).await.unwrap();

        assert_eq!(fired.counts(), (0, 2, 0));
        assert_eq!(
            limiter.submissions(),
            vec![("global".to_string(), 7), ("global".to_string(), 1)]
        );
    }
}

macro_rules! test_tenant_scenario {
    ($name:ident, $limiter_init:expr) => {
        #[cfg(test)]
        mod $name {
            use super::*;

            #[tokio::test]
            async fn test_tenants_are_limited_independently() {
                let (clock, mock_clock) = Clock::mock();
                let capacity = NonZeroU64::new(100).unwrap();
                let limiter = Arc::new(($limiter_init)(capacity, Duration::from_secs(3), clock));

                let mock = MockService::new();
                let svc = per_ip(limiter, 1).default_layer().layer(mock.clone());

                for _ in 0..100 {
                    let res = send(&mut svc.clone(), request_from("10.0.0.1"))
                        .await
                        .unwrap();
                    assert_eq!(res.status(), StatusCode::OK);
                }

                // The 101st request from A and a request from B, in the same window
                let (mut svc_a, mut svc_b) = (svc.clone(), svc.clone());
                let (res_a, res_b) = tokio::join!(
                    tokio::spawn(async move { send(&mut svc_a, request_from("10.0.0.1")).await }),
                    tokio::spawn(async move { send(&mut svc_b, request_from("127.0.0.15")).await }),
                );
                let res_a = res_a.unwrap().unwrap();
                let res_b = res_b.unwrap().unwrap();

                assert_eq!(res_a.status(), StatusCode::TOO_MANY_REQUESTS);
                assert_eq!(res_b.status(), StatusCode::OK);
                assert_eq!(mock.calls(), 101);

                // Waiting the advertised time is enough
                let retry_in: u64 = res_a.headers()[X_RETRY_IN]
                    .to_str()
                    .unwrap()
                    .parse()
                    .unwrap();
                assert!(retry_in > 0);
                mock_clock.increment(Duration::from_millis(retry_in));

                let res = send(&mut svc.clone(), request_from("10.0.0.1"))
                    .await
                    .unwrap();
                assert_eq!(res.status(), StatusCode::OK);
            }
        }
    };
}

test_tenant_scenario!(
    fixed_window_scenario,
    TenantLimiter::fixed_window_with_clock
);

test_tenant_scenario!(
    sliding_window_scenario,
    TenantLimiter::sliding_window_with_clock
);

test_tenant_scenario!(gcra_scenario, TenantLimiter::gcra_with_clock);

#[tokio::test]
async fn test_concurrent_hammer() {
    let capacity = 50;
    let limiter = Arc::new(TenantLimiter::fixed_window(
        NonZeroU64::new(capacity).unwrap(),
        Duration::from_secs(60),
    ));

    let mock = MockService::new();
    let service = ServiceBuilder::new()
        .load_limit(&per_ip(limiter, 1))
        .service(mock.clone());

    let mut handles = vec![];
    for i in 0..200 {
        let mut svc = service.clone();
        let ip = if i % 2 == 0 { "10.0.0.1" } else { "10.0.0.2" };
        handles.push(tokio::spawn(async move {
            send(&mut svc, request_from(ip)).await
        }));
    }

    let mut accepted = 0;
    let mut rejected = 0;
    for h in handles {
        let res = h.await.expect("Task panicked").expect("Call failed");
        match res.status() {
            StatusCode::OK => accepted += 1,
            StatusCode::TOO_MANY_REQUESTS => rejected += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    // Exactly capacity per tenant got through, never more
    assert_eq!(accepted, 2 * capacity as usize);
    assert_eq!(rejected, 200 - 2 * capacity as usize);
    assert_eq!(mock.calls(), 2 * capacity as usize);
}

#[tokio::test]
async fn test_rejection_keeps_inner_readiness_until_dropped() {
    let limiter = ScriptedLimiter::new(Ok(SubmitResult::reject(None)));
    let mock = MockService::new();
    let svc = ServiceBuilder::new()
        .load_limit(&per_ip(limiter, 1))
        .concurrency_limit(1)
        .service(mock.clone());

    let mut first = svc.clone();
    let res = send(&mut first, request_from("10.0.0.1")).await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

    // The only slot is still reserved by `first`
    let mut second = svc.clone();
    assert!(second.ready().now_or_never().is_none());

    // ...and is reused by its next call
    let res = send(&mut first, request_from("10.0.0.1")).await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

    drop(first);
    assert!(second.ready().now_or_never().is_some());
    assert_eq!(mock.calls(), 0);
}
