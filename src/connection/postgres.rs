// ============================================================================
// PostgreSQL Backend
// ============================================================================
//
// Each `connect()` opens a brand new session; nothing is pooled. The socket
// is driven by a spawned task that ends when the `Client` is dropped, at
// which point the server rolls back whatever transaction was still open.
//
// ============================================================================

use super::config::ConnectionConfig;
use super::{Connection, ConnectionProvider, IsolationLevel, TargetTable};
use crate::core::{Color, ColorTransition, Result, SkewError};
use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, warn};

pub struct PostgresProvider {
    config: ConnectionConfig,
}

impl PostgresProvider {
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }
}

#[async_trait]
impl ConnectionProvider for PostgresProvider {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let (client, connection) = self
            .config
            .pg_config()
            .connect(NoTls)
            .await
            .map_err(|err| {
                SkewError::Connection(format!("{}: {}", self.config.to_url(), err))
            })?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(error = %err, "postgres connection terminated");
            }
        });

        debug!(url = %self.config.to_url(), "opened postgres session");
        Ok(Box::new(PgConnection {
            client,
            in_transaction: false,
        }))
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

pub struct PgConnection {
    client: Client,
    in_transaction: bool,
}

#[async_trait]
impl Connection for PgConnection {
    async fn begin(&mut self, isolation: IsolationLevel) -> Result<()> {
        if self.in_transaction {
            return Err(SkewError::Execution("Transaction already active".into()));
        }
        self.client.batch_execute(isolation.begin_statement()).await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn update_colors(
        &mut self,
        target: &TargetTable,
        transition: ColorTransition,
    ) -> Result<u64> {
        let sql = target.update_statement(transition)?;
        debug!(%sql, "executing update");
        Ok(self.client.execute(sql.as_str(), &[]).await?)
    }

    async fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(SkewError::Execution("No active transaction".into()));
        }
        // A failed COMMIT still ends the transaction server-side.
        self.in_transaction = false;
        self.client.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.client.batch_execute("ROLLBACK").await?;
        Ok(())
    }

    async fn select_colors(&mut self, target: &TargetTable) -> Result<Vec<Color>> {
        let rows = self
            .client
            .query(target.select_statement().as_str(), &[])
            .await?;
        rows.iter()
            .map(|row| -> Result<Color> {
                let value: String = row.try_get(0)?;
                value.parse()
            })
            .collect()
    }

    fn is_in_transaction(&self) -> bool {
        self.in_transaction
    }
}
