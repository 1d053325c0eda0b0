#![allow(clippy::module_inception)]

mod classifier;
mod endpoint;
mod key;
mod state;

pub use classifier::{EndpointClassifier, EndpointRule};
pub use endpoint::Endpoint;
pub use key::EndpointKey;
pub use state::RateLimitState;
