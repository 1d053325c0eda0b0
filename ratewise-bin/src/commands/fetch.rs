use anyhow::Result;
use http::HeaderMap;
use log::{info, warn};
use ratewise_lib::{Priority, RequestOptions, Scheduler};

use crate::options::{Config, FetchArgs, HeaderMapExt};
use crate::report::{FetchReport, RequestOutcome};

/// Fetch every URL of `args`, either one after the other on this task or
/// through the request queue
pub(crate) async fn fetch(args: &FetchArgs, cfg: &Config) -> Result<FetchReport> {
    let scheduler = Scheduler::builder()
        .config(cfg.rate_limit_config())
        .credentials(cfg.secrets())
        .enable_queue(args.queue)
        .user_agent(cfg.user_agent.clone())
        .build()
        .scheduler()?;

    let options = RequestOptions::builder()
        .headers(HeaderMap::from_header_pairs(&cfg.header)?)
        .build();

    let results = if args.queue {
        fetch_queued(&scheduler, &args.urls, &options, args.priority).await
    } else {
        fetch_direct(&scheduler, &args.urls, &options).await
    };

    let summary = scheduler.status_summary();
    scheduler.shutdown_and_wait().await;

    Ok(FetchReport { results, summary })
}

async fn fetch_direct(
    scheduler: &Scheduler,
    urls: &[String],
    options: &RequestOptions,
) -> Vec<RequestOutcome> {
    let mut results = Vec::with_capacity(urls.len());
    for url in urls {
        let result = scheduler.execute(url, options.clone()).await;
        results.push(outcome(scheduler, url, &result));
    }
    results
}

async fn fetch_queued(
    scheduler: &Scheduler,
    urls: &[String],
    options: &RequestOptions,
    priority: Priority,
) -> Vec<RequestOutcome> {
    // Submit everything first so the workers can run concurrently
    let submitted: Vec<_> = urls
        .iter()
        .map(|url| (url, scheduler.submit(url, options.clone(), priority)))
        .collect();

    let mut results = Vec::with_capacity(urls.len());
    for (url, submitted) in submitted {
        let result = match submitted {
            Ok(handle) => handle.await,
            Err(e) => {
                warn!("Cannot queue {url}: {e}");
                Err(e)
            }
        };
        results.push(outcome(scheduler, url, &result));
    }
    results
}

fn outcome(
    scheduler: &Scheduler,
    url: &str,
    result: &ratewise_lib::Result<ratewise_lib::Response>,
) -> RequestOutcome {
    match result {
        Ok(response) => info!("{response} via {}", response.endpoint()),
        Err(e) => warn!("{url}: {e}"),
    }
    RequestOutcome::new(url, scheduler.classify(url), result)
}
