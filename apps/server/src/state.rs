use axum::extract::FromRef;
use courier_database::Database;
use courier_domain::config::AppConfig;
use courier_tracking::{Tracking, TrackingRegistry};
use std::borrow::Cow;
use std::ops::Deref;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ApiStateError {
    #[error("State validation error{}: {message}", format_context(.context))]
    Validation { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

fn format_context(context: &Option<Cow<'static, str>>) -> Cow<'static, str> {
    context.as_ref().map_or(Cow::Borrowed(""), |c| Cow::Owned(format!(" ({c})")))
}

#[derive(Debug)]
pub struct ApiStateInner {
    pub config: AppConfig,
    pub database: Database,
    pub sessions: TrackingRegistry,
    pub tracking: Tracking,
}

#[derive(Debug, Clone)]
pub struct ApiState {
    inner: Arc<ApiStateInner>,
}

impl ApiState {
    #[must_use]
    pub fn builder() -> ApiStateBuilder {
        ApiStateBuilder::default()
    }
}

impl Deref for ApiState {
    type Target = ApiStateInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl FromRef<ApiState> for AppConfig {
    fn from_ref(state: &ApiState) -> Self {
        state.inner.config.clone()
    }
}

impl FromRef<ApiState> for Database {
    fn from_ref(state: &ApiState) -> Self {
        state.inner.database.clone()
    }
}

impl FromRef<ApiState> for TrackingRegistry {
    fn from_ref(state: &ApiState) -> Self {
        state.inner.sessions.clone()
    }
}

impl FromRef<ApiState> for Tracking {
    fn from_ref(state: &ApiState) -> Self {
        state.inner.tracking.clone()
    }
}

#[derive(Debug, Default)]
pub struct ApiStateBuilder {
    config: Option<AppConfig>,
    database: Option<Database>,
    sessions: Option<TrackingRegistry>,
    tracking: Option<Tracking>,
}

impl ApiStateBuilder {
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn db(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    pub fn sessions(mut self, sessions: TrackingRegistry) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn tracking(mut self, tracking: Tracking) -> Self {
        self.tracking = Some(tracking);
        self
    }

    pub fn build(self) -> Result<ApiState, ApiStateError> {
        let config = self.config.ok_or_else(|| ApiStateError::Validation {
            message: "AppConfig not provided".into(),
            context: None,
        })?;
        let database = self.database.ok_or_else(|| ApiStateError::Validation {
            message: "Database not provided".into(),
            context: None,
        })?;
        let sessions = self.sessions.unwrap_or_default();
        let tracking = self.tracking.ok_or_else(|| ApiStateError::Validation {
            message: "Tracking slice not provided".into(),
            context: None,
        })?;

        Ok(ApiState {
            inner: Arc::new(ApiStateInner { config, database, sessions, tracking }),
        })
    }
}
