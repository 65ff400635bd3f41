use anyhow::Result;
use clap::Parser;
use salesflow::{server, Config};
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    // ─── 1) init logging ─────────────────────────────────────────────
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(config.log_level.parse().unwrap_or(Level::INFO.into())),
        )
        .init();
    info!(?config, "startup");

    // ─── 2) open collaborators once ──────────────────────────────────
    let pipeline = config.build_pipeline()?;
    info!(table = %pipeline.schema().name, sink = ?config.sink, "pipeline ready");

    // ─── 3) serve ────────────────────────────────────────────────────
    let routes = server::routes(pipeline, config.max_upload_bytes);
    let (addr, serving) = warp::serve(routes).bind_with_graceful_shutdown(
        ([0, 0, 0, 0], config.port),
        async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        },
    );
    info!("listening on http://{}", addr);
    serving.await;

    info!("all done");
    Ok(())
}
