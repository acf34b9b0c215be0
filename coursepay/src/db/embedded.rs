//! Local PostgreSQL for development, managed by `postgresql_embedded`.
//!
//! Only functional with the `embedded-db` feature; without it the type exists so the startup
//! code can name it, but it can never be constructed.

use std::path::PathBuf;
use tracing::info;

const DATABASE_NAME: &str = "coursepay";

pub struct EmbeddedDatabase {
    #[cfg(feature = "embedded-db")]
    postgres: postgresql_embedded::PostgreSQL,
    connection_string: String,
}

impl EmbeddedDatabase {
    /// Install (first run only), start and create the application database
    #[cfg(feature = "embedded-db")]
    pub async fn start(data_dir: Option<PathBuf>, persistent: bool) -> anyhow::Result<Self> {
        use postgresql_embedded::{PostgreSQL, Settings};

        let mut settings = Settings::default();
        settings.temporary = !persistent;
        if let Some(dir) = data_dir {
            settings.data_dir = dir;
        }

        let mut postgres = PostgreSQL::new(settings);
        postgres.setup().await?;
        postgres.start().await?;
        if !postgres.database_exists(DATABASE_NAME).await? {
            postgres.create_database(DATABASE_NAME).await?;
        }

        let connection_string = postgres.settings().url(DATABASE_NAME);
        info!("Embedded database listening on port {}", postgres.settings().port);

        Ok(Self {
            postgres,
            connection_string,
        })
    }

    #[cfg(not(feature = "embedded-db"))]
    pub async fn start(_data_dir: Option<PathBuf>, _persistent: bool) -> anyhow::Result<Self> {
        anyhow::bail!(
            "Embedded database is configured but the feature is not enabled. \
             Rebuild with --features embedded-db to use embedded database."
        )
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub async fn stop(self) -> anyhow::Result<()> {
        #[cfg(feature = "embedded-db")]
        self.postgres.stop().await?;
        info!("Embedded database stopped");
        Ok(())
    }
}
