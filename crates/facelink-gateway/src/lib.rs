//! `facelink-gateway` – HTTP front for the recognition service.
//!
//! Accepts multipart uploads from browsers or scripts and forwards them to
//! the recognition service, adding recognition defaults where the caller
//! omitted them.  Upstream replies, including failures, are relayed with
//! their original status and body.

pub mod proxy;
pub mod routes;
pub mod server;

pub use proxy::{ForwardedForm, Forwarder, UpstreamReply};
pub use routes::{GatewayState, router};
pub use server::{BoundGateway, DEFAULT_PORT, GatewayConfig, GatewayServer};
