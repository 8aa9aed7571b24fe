// Request/response transport to the Vestnik REST surface.

pub mod api;
pub mod http;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod transport;

pub use api::ApiClient;
pub use http::HttpTransport;
#[cfg(any(test, feature = "mock"))]
pub use mock::MockTransport;
pub use transport::{Method, Request, Transport};
