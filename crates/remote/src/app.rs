use std::net::SocketAddr;

use anyhow::Context;

use crate::{
    AppState, auth::JwtAuth, config::RemoteServerConfig, db, feed::ChangeBroker, routes,
};

pub struct Server;

impl Server {
    pub async fn run(config: RemoteServerConfig) -> anyhow::Result<()> {
        let pool = db::pool::create_pool(&config.database_url)
            .await
            .context("failed to create postgres pool")?;

        db::migrate::run(&pool)
            .await
            .context("failed to run database migrations")?;

        let broker = ChangeBroker::default();
        let auth = JwtAuth::new(&config.jwt_secret);
        let state = AppState::new(pool.clone(), broker.clone(), auth);

        let listener = db::TaskChangeListener::new(pool.clone(), broker);
        tokio::spawn(listener.run());

        let router = routes::router(state);
        let addr: SocketAddr = config
            .listen_addr
            .parse()
            .context("listen address is invalid")?;
        let tcp_listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("failed to bind tcp listener")?;

        tracing::info!(%addr, "kanban board server listening");

        axum::serve(tcp_listener, router.into_make_service())
            .await
            .context("kanban board server failure")?;

        Ok(())
    }
}
