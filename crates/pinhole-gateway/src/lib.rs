//! HTTP gateway for the Pinhole URL shortener.

pub mod app;
pub mod auth;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod model;
pub mod state;

pub use app::App;
pub use auth::{IdentityProvider, SignedTokenProvider};
pub use state::AppState;
