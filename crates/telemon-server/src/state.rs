use crate::envelope::EnvelopeSettings;
use crate::service::MetricsService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MetricsService>,
    pub envelope: Arc<EnvelopeSettings>,
}

impl AppState {
    pub fn new(service: Arc<MetricsService>, envelope: EnvelopeSettings) -> Self {
        Self {
            service,
            envelope: Arc::new(envelope),
        }
    }
}
