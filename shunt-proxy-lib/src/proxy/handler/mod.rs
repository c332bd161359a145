pub mod headers;
pub mod request;

pub use request::{handle_proxy_request, RouteKind};
