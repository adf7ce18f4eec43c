#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    billforge_observability::init();

    let config = billforge_server::ServerConfig::from_env()?;
    let server = billforge_server::assemble(&config)?;

    server.lifecycle.initialize_all()?;
    server.lifecycle.start_all()?;
    tracing::info!("billforge server started, waiting for ctrl-c");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");

    let failures = server.lifecycle.stop_all();
    for failure in &failures {
        tracing::error!(error = %failure, "shutdown step failed");
    }
    if !failures.is_empty() {
        anyhow::bail!("{} service(s) failed to stop", failures.len());
    }
    Ok(())
}
