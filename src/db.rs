use anyhow::Result;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct Db {
    pub pool: MySqlPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await?;
        info!("connected to db");
        Ok(Self { pool })
    }
}

/// Physical table names under a site's table prefix (`wp_` on stock installs).
#[derive(Debug, Clone)]
pub struct Tables {
    prefix: String,
}

impl Tables {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    pub fn posts(&self) -> String {
        format!("{}posts", self.prefix)
    }

    pub fn postmeta(&self) -> String {
        format!("{}postmeta", self.prefix)
    }

    pub fn options(&self) -> String {
        format!("{}options", self.prefix)
    }
}
