#![allow(unreachable_pub)]

mod error;
mod options;
mod response;

pub use error::{BoxError, ErrorKind};
pub use options::RequestOptions;
pub use response::Response;

/// Default `User-Agent` sent by the built-in transport
pub const DEFAULT_USER_AGENT: &str = concat!("ratewise/", env!("CARGO_PKG_VERSION"));

/// The ratewise `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
