use std::sync::Arc;

use tower::Layer;

use crate::admission::Admission;
use crate::service::LoadLimitService;

/// Applies load limiting to requests.
///
/// Only obtainable from a valid [`LoadLimitMiddleware`](crate::LoadLimitMiddleware),
/// so every service it builds is fully configured.
#[derive(Debug, Clone)]
pub struct LoadLimitLayer {
    admission: Arc<Admission>,
}

impl LoadLimitLayer {
    pub(crate) fn new(admission: Arc<Admission>) -> Self {
        Self { admission }
    }
}

impl<S> Layer<S> for LoadLimitLayer {
    type Service = LoadLimitService<S>;

    fn layer(&self, service: S) -> Self::Service {
        LoadLimitService::new(service, Arc::clone(&self.admission))
    }
}
