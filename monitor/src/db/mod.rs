pub mod repository;
pub mod retention;
pub mod schema;

use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;

pub use repository::SqlxAlertRepository;
pub use retention::spawn_retention;

/// Connection pool for the persistence sink. Call
/// `sqlx::any::install_default_drivers()` once before connecting.
#[derive(Clone)]
pub struct Db {
    pub pool: AnyPool,
}

impl Db {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = AnyPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        schema::migrate(&self.pool).await
    }
}
