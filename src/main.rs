use anyhow::Context;
use dbm_core::config::AppConfig;
use dbm_core::services::{mask_credentials, AdapterFactory};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_ansi(config.logging.style != "never")
        .init();

    let factory = AdapterFactory::from_config(&config)?;
    let engines: Vec<String> = factory
        .supported_engines()
        .iter()
        .map(|kind| kind.to_string())
        .collect();
    info!("Enabled engines: {}", engines.join(", "));

    let Some(probe) = config.probe.as_ref() else {
        warn!(
            "No probe target configured; set DBM_PROBE__ENGINE and DBM_PROBE__HOST to check a connection"
        );
        return Ok(());
    };

    let descriptor = probe.descriptor()?;
    let adapter = factory.create_adapter(descriptor.engine)?;
    let dsn = mask_credentials(&adapter.build_dsn(&descriptor)?);
    info!("Probing {} at {}", descriptor.engine, dsn);

    let handle = adapter
        .connect(&descriptor)
        .await
        .with_context(|| format!("connecting to {}", dsn))?;

    let result = async {
        let databases = adapter.get_databases(&handle).await?;
        info!("{} database(s): {}", databases.len(), databases.join(", "));

        let target = if descriptor.database.is_empty() {
            databases.first().cloned()
        } else {
            Some(descriptor.database.clone())
        };
        if let Some(database) = target {
            let tables = adapter.get_tables(&handle, &database).await?;
            info!("{} table(s) in {}", tables.len(), database);
            for table in &tables {
                info!(
                    "  {} ({:?}, ~{} rows)",
                    table.name,
                    table.kind,
                    table.rows
                );
            }
        }
        Ok::<_, dbm_core::AppError>(())
    }
    .await;

    if let Err(e) = adapter.close(handle).await {
        warn!("Failed to close probe connection: {}", e);
    }

    result.map_err(|e| {
        error!("Probe failed: {}", e);
        anyhow::Error::new(e)
    })
}
