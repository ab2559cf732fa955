//! Provider selection page shown when several login methods are configured.

use std::sync::Arc;

use axum::response::Response;

use crate::render::{ProviderLink, ProviderSelection, Renderer};

pub struct SelectProvider {
    renderer: Arc<dyn Renderer>,
    force: bool,
}

impl SelectProvider {
    /// With `force` set, the page is shown even for a single provider.
    pub fn new(renderer: Arc<dyn Renderer>, force: bool) -> Self {
        Self { renderer, force }
    }

    pub fn force(&self) -> bool {
        self.force
    }

    pub fn select_authentication(&self, providers: Vec<ProviderLink>) -> Response {
        self.renderer.select_provider(ProviderSelection { providers })
    }
}
