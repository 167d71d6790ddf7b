use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono_tz::Tz;
use sqlx::{Pool, Postgres};

use crate::auth;
use crate::config::Config;
use crate::cron::CronRegistry;
use crate::cron::pg::PgCronRegistry;
use crate::error::Error;
use crate::http_client::HttpClient;
use crate::queue::Queue;
use crate::queue::pg::PgQueue;
use crate::store::{PgStore, Store, UserStore};

/// The dependency-injected handles every role works through: store, queue,
/// cron registry and the shared HTTP client. Built once in `main` and
/// passed explicitly; there is no process-wide mutable state behind it.
#[derive(Clone)]
pub struct Engine {
    pub store: Arc<dyn Store>,
    pub queue: Arc<dyn Queue>,
    pub cron: Arc<dyn CronRegistry>,
    pub http: HttpClient,
}

impl Engine {
    /// Wires the Postgres-backed implementations onto one shared pool.
    /// Also returns the concrete registry because the scheduler role
    /// drives its tick loop directly.
    pub fn connect(config: &Config, pool: Pool<Postgres>) -> anyhow::Result<(Self, PgCronRegistry)> {
        let tz: Tz = config
            .timezone
            .parse()
            .map_err(|_| anyhow!("Invalid timezone: {}", config.timezone))?;

        let registry = PgCronRegistry::new(pool.clone(), tz);
        let http = HttpClient::new(Duration::from_secs(config.http_timeout_secs))?;

        let engine = Engine {
            store: Arc::new(PgStore::new(pool.clone())),
            queue: Arc::new(PgQueue::new(pool)),
            cron: Arc::new(registry.clone()),
            http,
        };

        Ok((engine, registry))
    }

    /// Creates the bootstrap admin account when it does not exist yet, so
    /// a fresh deployment is immediately usable.
    pub async fn ensure_default_admin(&self, config: &Config) -> anyhow::Result<()> {
        if self
            .store
            .user_by_name(&config.default_admin_name)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let password_hash = auth::hash_password(&config.default_admin_password)?;

        match self
            .store
            .insert_user(
                &config.default_admin_name,
                &config.default_admin_email,
                &password_hash,
            )
            .await
        {
            Ok(user) => {
                println!(
                    "Created default admin user {} (id {})",
                    user.name, user.id
                );
                Ok(())
            }
            // Another role of the same deployment won the race.
            Err(Error::Conflict(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
