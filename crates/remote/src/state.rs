use std::sync::Arc;

use sqlx::PgPool;

use crate::{auth::JwtAuth, feed::ChangeBroker};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    pool: PgPool,
    broker: ChangeBroker,
    auth: JwtAuth,
}

impl AppState {
    pub fn new(pool: PgPool, broker: ChangeBroker, auth: JwtAuth) -> Self {
        Self {
            inner: Arc::new(AppStateInner { pool, broker, auth }),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    pub fn broker(&self) -> &ChangeBroker {
        &self.inner.broker
    }

    pub fn auth(&self) -> &JwtAuth {
        &self.inner.auth
    }
}
