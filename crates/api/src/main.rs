use anyhow::Context;

use jobping_infra::config::Settings;
use jobping_pipeline::bootstrap::build_pipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    jobping_observability::init();

    let settings = Settings::from_env().context("loading settings")?;
    let pipeline = build_pipeline(&settings).await.context("building pipeline")?;
    let app = jobping_api::app::build_app(pipeline);

    let listener = tokio::net::TcpListener::bind(&settings.api_bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.api_bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
