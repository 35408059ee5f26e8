use std::sync::Arc;

use pinhole_core::ShortKey;
use pinhole_shortener::Shortener;

use crate::auth::IdentityProvider;

#[derive(Clone)]
pub struct AppState {
    shortener: Arc<dyn Shortener>,
    identity: Arc<dyn IdentityProvider>,
    base_url: String,
}

impl AppState {
    pub fn new(
        shortener: Arc<dyn Shortener>,
        identity: Arc<dyn IdentityProvider>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            shortener,
            identity,
            base_url: public_base_url.into(),
        }
    }

    pub fn shortener(&self) -> &dyn Shortener {
        self.shortener.as_ref()
    }

    pub fn identity(&self) -> &dyn IdentityProvider {
        self.identity.as_ref()
    }

    /// Renders the public short URL for `key`.
    pub fn short_url(&self, key: &ShortKey) -> String {
        key.to_url(&self.base_url)
    }
}
