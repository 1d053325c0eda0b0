//! `ratewise` schedules HTTP requests against rate-limited APIs.
//!
//! It watches the rate-limit and cache headers upstream APIs send back,
//! paces requests per endpoint, rotates between several API credentials,
//! retries transient failures with backoff and optionally funnels work through
//! a bounded priority queue served by a fixed pool of worker tasks.
//!
//! ```no_run
//! use ratewise_lib::{RequestOptions, Result, Scheduler};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let scheduler = Scheduler::builder().build().scheduler()?;
//!
//!     // Direct call on the current task
//!     let response = scheduler
//!         .execute("https://api.wynncraft.com/v3/player/Salted", RequestOptions::default())
//!         .await?;
//!     println!("{} via {}", response.status(), response.endpoint());
//!
//!     // Queued call; lower priority values are served first
//!     let handle = scheduler.submit("https://api.nori.fish/items", RequestOptions::default(), 0)?;
//!     let response = handle.await?;
//!     println!("{}", response.status());
//!
//!     scheduler.shutdown_and_wait().await;
//!     Ok(())
//! }
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![allow(clippy::module_name_repetitions)]

#[cfg(feature = "native-tls")]
use openssl_sys as _; // required for vendored-openssl feature

mod scheduler;
mod types;

pub mod credentials;
pub mod executor;
pub mod queue;
pub mod ratelimit;

#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::{
    credentials::{Credential, CredentialPool, CredentialStatus},
    executor::{
        Backoff, ReqwestTransport, RequestExecutor, Transport, TransportError, TransportRequest,
        TransportResponse,
    },
    queue::{Priority, QueueStatus, RequestQueue, ResultHandle},
    ratelimit::{
        EndpointClassifier, EndpointConfig, EndpointKey, EndpointPool, EndpointStatus,
        RateLimitConfig, RateLimitState,
    },
    scheduler::{Scheduler, SchedulerBuilder, StatusSummary},
    types::{BoxError, DEFAULT_USER_AGENT, ErrorKind, RequestOptions, Response, Result},
};
