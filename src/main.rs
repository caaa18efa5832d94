use actix_web::web;
use std::net::TcpListener;
use std::sync::Arc;

use keyward::auth::{
    spawn_revocation_sweeper, AuthService, InMemoryRevocationRegistry, RevocationRegistry,
};
use keyward::clock::{Clock, SystemClock};
use keyward::configuration::get_configuration;
use keyward::startup::run;
use keyward::store::{self, CredentialStore, InMemoryCredentialStore};
use keyward::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    let retention_margin = chrono::Duration::seconds(configuration.revocation.retention_margin);
    let max_sessions = configuration.sessions.max_refresh_tokens;

    let (credentials, registry): (Arc<dyn CredentialStore>, Arc<dyn RevocationRegistry>) =
        match &configuration.database {
            Some(database) => {
                tracing::info!(host = %database.host, "Connecting to Postgres");
                let pool = store::postgres::connect(database).await.map_err(|e| {
                    tracing::error!("Failed to connect to database: {}", e);
                    std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "Database connection error",
                    )
                })?;
                tracing::info!("Database ready, migrations applied");
                let credentials: Arc<dyn CredentialStore> =
                    Arc::new(store::PgCredentialStore::new(pool.clone(), max_sessions));
                let registry: Arc<dyn RevocationRegistry> =
                    Arc::new(store::PgRevocationRegistry::new(pool, retention_margin));
                (credentials, registry)
            }
            None => {
                tracing::warn!("No database configured, using in-memory stores");
                let credentials: Arc<dyn CredentialStore> =
                    Arc::new(InMemoryCredentialStore::new(max_sessions));
                let registry: Arc<dyn RevocationRegistry> =
                    Arc::new(InMemoryRevocationRegistry::new(retention_margin));
                (credentials, registry)
            }
        };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let service = AuthService::new(&configuration, credentials, registry.clone(), clock.clone())
        .map_err(|e| {
            tracing::error!("Failed to initialise authentication service: {}", e);
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "Configuration error")
        })?;

    let _sweeper = spawn_revocation_sweeper(
        registry,
        clock,
        std::time::Duration::from_secs(configuration.revocation.sweep_interval.max(1)),
    );

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    let server = run(listener, web::Data::new(service))?;
    server.await
}
