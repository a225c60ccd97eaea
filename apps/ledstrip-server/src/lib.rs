//! HTTP control plane for an addressable LED strip.
//!
//! The server owns the control [`LedSurface`](ledstrip_surface::LedSurface)
//! and serves it over HTTP. Animation scripts never run in this process: the
//! [`animation`] module launches them in a separate animator process and
//! relays its frames to HTTP callers and event subscribers.

pub mod animation;
pub mod config;
pub mod routes;
pub mod state;
