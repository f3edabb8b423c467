//! Control plane (C8): HTTP API, RTSP-server child supervision, and DVR
//! host auto-discovery wiring.

pub mod api;
pub mod rtsp_config;

pub use api::{build_router, AppState};
