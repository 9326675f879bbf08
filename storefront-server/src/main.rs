use anyhow::Context;
use storefront_server::{Config, Server, init_logger_with_file};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("loading configuration")?;

    std::fs::create_dir_all(&config.work_dir).context("creating work directory")?;
    init_logger_with_file(&config.log_level, config.log_json, Some(config.log_dir().as_path()))
        .context("initialising logging")?;

    tracing::info!(
        environment = %config.environment,
        port = config.http_port,
        "Storefront server starting"
    );

    let server = Server::new(config);
    if let Err(e) = server.run().await {
        tracing::error!(error = %e, "Server error");
        return Err(e.into());
    }
    Ok(())
}
