use std::sync::Arc;

use application::ConnectionSessionManager;
use config::RealtimeConfig;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<ConnectionSessionManager>,
    pub realtime: RealtimeConfig,
}

impl AppState {
    pub fn new(sessions: Arc<ConnectionSessionManager>, realtime: RealtimeConfig) -> Self {
        Self { sessions, realtime }
    }
}
