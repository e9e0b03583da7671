use std::sync::Arc;

use crate::{
    auth::CoordinatorAuth,
    config::Settings,
    service::ServiceContext,
};

#[derive(Clone)]
pub struct AppState {
    pub service_context: Arc<ServiceContext>,
    pub coordinator_auth: Arc<CoordinatorAuth>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(service_context: Arc<ServiceContext>, settings: Arc<Settings>) -> Self {
        let coordinator_auth = Arc::new(CoordinatorAuth::new(&settings.auth.coordinator_token));
        Self {
            service_context,
            coordinator_auth,
            settings,
        }
    }
}
