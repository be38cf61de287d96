use dotenvy::dotenv;
use tracing::info;

use subscription_reconciler::{
    adapters::http::app_state::AppState,
    infra::{
        app::create_app,
        error::InfraError,
        setup::{init_app_state, init_tracing},
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    let app_state = init_app_state().await?;

    // Read bind address from config before moving app_state
    let bind_addr = app_state.config.bind_addr;

    spawn_processed_event_prune(app_state.clone());

    let app = create_app(app_state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(InfraError::TcpBind)?;

    info!("Reconciler listening at {}", &listener.local_addr()?);

    axum::serve(listener, app)
        .await
        .map_err(InfraError::Server)?;

    Ok(())
}

fn spawn_processed_event_prune(app_state: AppState) {
    let retention = app_state.config.processed_event_retention;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            if let Err(err) = app_state.webhook_use_cases.prune_processed(retention).await {
                tracing::error!(error = ?err, "processed webhook event prune failed");
            }
        }
    });
}
