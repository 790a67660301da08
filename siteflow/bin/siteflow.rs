use clap::{CommandFactory, Parser};
use siteflow::{
    audit::AuditStore,
    backups::BackupStore,
    cli::{SiteflowArgs, SiteflowSubcommand},
    config::SiteflowConfig,
    server, store, SiteflowResult,
};
use tracing_subscriber::EnvFilter;

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> SiteflowResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = SiteflowArgs::parse();
    match args.subcommand {
        Some(SiteflowSubcommand::Serve { config, host, port }) => {
            let mut config = SiteflowConfig::load(config.as_deref()).await?;
            if let Some(host) = host {
                config.http.host = host;
            }
            if let Some(port) = port {
                config.http.port = port;
            }
            server::serve(config).await?;
        }
        Some(SiteflowSubcommand::Validate { config }) => {
            let path = config.clone();
            SiteflowConfig::load(config.as_deref()).await?;
            match path {
                Some(path) => println!("{} is valid", path.display()),
                None => println!("configuration is valid"),
            }
        }
        Some(SiteflowSubcommand::Cleanup { config }) => {
            let config = SiteflowConfig::load(config.as_deref()).await?;
            let pool = store::init_db(&config.storage.db_path).await?;
            let retention = config.storage.audit_retention_days;

            let audit = AuditStore::new(pool.clone(), config.storage.audit_max_output_length);
            let deleted = audit.cleanup(retention).await?;

            let backups = BackupStore::new(pool);
            let pruned = backups.cleanup(retention).await?;

            println!("deleted {deleted} audit entries and {pruned} backup runs");
        }
        None => {
            if args.version {
                println!("siteflow {}", env!("CARGO_PKG_VERSION"));
            } else {
                SiteflowArgs::command().print_help()?;
            }
        }
    }

    Ok(())
}
