use http::{HeaderMap, Method};
use typed_builder::TypedBuilder;

/// Per-request settings passed through to the transport.
///
/// The scheduler never looks at the body; it only adds the `Authorization`
/// header of the credential it picked.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct RequestOptions {
    /// HTTP method, `GET` by default
    #[builder(default)]
    pub method: Method,

    /// Additional request headers
    #[builder(default)]
    pub headers: HeaderMap,

    /// Optional request body
    #[builder(default, setter(strip_option, into))]
    pub body: Option<Vec<u8>>,

    /// Overrides the retry budget resolved for the endpoint
    #[builder(default, setter(strip_option))]
    pub max_retries: Option<u64>,
}
