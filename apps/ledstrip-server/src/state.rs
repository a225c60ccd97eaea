use std::{collections::HashSet, sync::Arc};

use ledstrip_surface::LedSurface;

use crate::{
    animation::{AnimationManager, AnimatorCommand},
    config::AppConfig,
};

#[derive(Clone)]
pub struct AppState {
    pub animations: AnimationManager,
    auth: Arc<AuthSettings>,
}

#[derive(Debug, Default)]
pub struct AuthSettings {
    pub required: bool,
    pub api_keys: HashSet<String>,
}

impl AuthSettings {
    pub fn accepts(&self, key: &str) -> bool {
        self.api_keys.contains(key)
    }
}

impl AppState {
    pub fn new(config: &AppConfig, surface: Arc<LedSurface>, animator: AnimatorCommand) -> Self {
        let animations = AnimationManager::spawn(surface, animator, config.query_timeout());
        let auth = AuthSettings {
            required: config.use_auth,
            api_keys: config.api_keys().into_iter().collect(),
        };
        Self::with_parts(animations, auth)
    }

    pub fn with_parts(animations: AnimationManager, auth: AuthSettings) -> Self {
        Self {
            animations,
            auth: Arc::new(auth),
        }
    }

    pub fn auth(&self) -> &AuthSettings {
        &self.auth
    }
}
