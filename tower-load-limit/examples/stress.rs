use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use clap::Parser;
use clap::ValueEnum;
use hdrhistogram::Histogram;
use http::Request;
use http::Response;
use http::StatusCode;
use load_limit::Strategy;
use load_limit::TenantLimiter;
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tower::BoxError;
use tower::Service;
use tower::ServiceBuilder;
use tower::ServiceExt;
use tower::service_fn;
use tower_load_limit::GateError;
use tower_load_limit::LoadLimitConfig;
use tower_load_limit::LoadLimitMiddleware;
use tower_load_limit::ServiceBuilderExt;
use tower_load_limit::X_RETRY_IN;
use tower_load_limit::tenant;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyKind {
    Fixed,
    Sliding,
    Gcra,
    All,
}

/// Hammer a load limited service from many tenants at once
#[derive(Debug, Parser)]
struct Args {
    /// Which strategy to run
    #[arg(long, value_enum, default_value = "all")]
    strategy: StrategyKind,

    /// Load each tenant may submit per window
    #[arg(long, default_value_t = 1_000)]
    capacity: u64,

    /// Length of the window
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
    window: Duration,

    /// Load charged per request
    #[arg(long, default_value_t = 1)]
    load: u64,

    /// Number of distinct tenants
    #[arg(long, default_value_t = 50)]
    tenants: usize,

    /// Total number of requests
    #[arg(long, default_value_t = 100_000)]
    requests: usize,

    /// Simulated work per accepted request
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5ms")]
    latency: Duration,

    /// Evict idle tenants this often
    #[arg(long, value_parser = humantime::parse_duration, default_value = "250ms")]
    purge_every: Duration,
}

#[derive(Default)]
struct Outcomes {
    accepted: usize,
    rejected: usize,
    retry_hints: usize,
    errors: usize,
}

async fn mock_db_call(
    _req: Request<String>,
    latency: Duration,
) -> Result<Response<String>, BoxError> {
    sleep(latency).await;
    Ok(Response::new("success".to_string()))
}

fn request(tenant: usize) -> Request<String> {
    Request::builder()
        .header(
            "x-forwarded-for",
            format!(
                "10.{}.{}.{}",
                (tenant >> 16) & 0xff,
                (tenant >> 8) & 0xff,
                tenant & 0xff
            ),
        )
        .body(String::new())
        .unwrap_or_default()
}

async fn run_load_test<S>(
    name: &str,
    limiter: Arc<TenantLimiter<S>>,
    args: &Args,
) -> Result<(), BoxError>
where
    S: Strategy + 'static,
{
    let middleware = LoadLimitMiddleware::new(
        LoadLimitConfig::new()
            .with_limiter(limiter.clone())
            .with_default_route_load(args.load)
            .with_tenant_key_fn(tenant::client_ip()),
    );
    let latency = args.latency;
    let svc = ServiceBuilder::new()
        .load_limit(&middleware)
        .service(service_fn(move |req| mock_db_call(req, latency)));

    let purger = {
        let limiter = limiter.clone();
        let every = args.purge_every;
        tokio::spawn(async move {
            loop {
                sleep(every).await;
                let purged = limiter.purge_idle();
                tracing::debug!(purged, "purged idle tenants");
            }
        })
    };

    let mut hist_elapsed = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3)?;
    let mut outcomes = Outcomes::default();
    let mut tasks = JoinSet::new();
    let barrier = Arc::new(Barrier::new(args.requests));

    let start = Instant::now();
    for i in 0..args.requests {
        let mut local_svc = svc.clone();
        let bar = barrier.clone();
        let req = request(i % args.tenants);
        tasks.spawn(async move {
            bar.wait().await;
            let req_start = Instant::now();
            let res = match local_svc.ready().await {
                Ok(ready_svc) => ready_svc.call(req).await,
                Err(err) => Err(err),
            };
            (res, req_start.elapsed())
        });
    }

    while let Some(task) = tasks.join_next().await {
        let (res, elapsed) = task?;
        match res {
            Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                outcomes.rejected += 1;
                if response.headers().contains_key(X_RETRY_IN) {
                    outcomes.retry_hints += 1;
                }
            }
            Ok(_) => {
                outcomes.accepted += 1;
                hist_elapsed.record(elapsed.as_micros() as u64)?;
            }
            Err(err) => {
                if let Some(gate_err) = err.downcast_ref::<GateError>() {
                    tracing::warn!(error = %gate_err, "admission failed");
                }
                outcomes.errors += 1;
            }
        }
    }
    purger.abort();

    let total_duration = start.elapsed();
    let throughput = args.requests as f64 / total_duration.as_secs_f64();
    let goodput = outcomes.accepted as f64 / total_duration.as_secs_f64();

    println!("--- {} ---", name);
    println!("Total Duration:  {:.2?}", total_duration);
    println!("Accepted/Total:  {}/{}", outcomes.accepted, args.requests);
    println!("Total Rate:      {:.2} req/sec", throughput);
    println!("Success Rate:    {:.2} req/sec (Goodput)", goodput);
    if outcomes.accepted > 0 {
        println!("P50 (Elapsed):   {}µs", hist_elapsed.value_at_quantile(0.5));
        println!("P99 (Elapsed):   {}µs", hist_elapsed.value_at_quantile(0.99));
    }
    println!(
        "Rejected:        {} ({} with {})",
        outcomes.rejected, outcomes.retry_hints, X_RETRY_IN
    );
    println!("Errors:          {}", outcomes.errors);
    println!();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let capacity = NonZeroU64::new(args.capacity).ok_or("capacity must be positive")?;
    if args.tenants == 0 {
        return Err("tenants must be positive".into());
    }

    println!(
        "Capacity {} per {:?}, load {} per request, {} tenants, {} requests\n",
        capacity,
        args.window,
        args.load,
        args.tenants,
        args.requests
    );

    if matches!(args.strategy, StrategyKind::Fixed | StrategyKind::All) {
        let limiter = Arc::new(TenantLimiter::fixed_window(capacity, args.window));
        run_load_test("Fixed Window", limiter, &args).await?;
    }
    if matches!(args.strategy, StrategyKind::Sliding | StrategyKind::All) {
        let limiter = Arc::new(TenantLimiter::sliding_window(capacity, args.window));
        run_load_test("Sliding Window", limiter, &args).await?;
    }
    if matches!(args.strategy, StrategyKind::Gcra | StrategyKind::All) {
        let limiter = Arc::new(TenantLimiter::gcra(capacity, args.window));
        run_load_test("Gcra", limiter, &args).await?;
    }

    Ok(())
}
