//! HTTP surface: the admission middleware and the server hosting it.

mod middleware;
mod server;

pub use middleware::{client_identity, throttle, ClientIp};
pub use server::{router, HttpServer};
