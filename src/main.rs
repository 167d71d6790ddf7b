mod admission;
mod api;
mod auth;
mod config;
mod cron;
mod dispatch;
mod engine;
mod error;
mod http_client;
mod id;
mod model;
mod pg;
mod queue;
mod scheduler;
mod store;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use tokio::select;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Parser)]
#[command(
    version,
    about,
    subcommand_required = false,
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(flatten)]
    serve: ServeOptions,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Runs the api, worker and scheduler in one process
    Serve(ServeOptions),
    /// Runs only the admin api
    Api(ServeOptions),
    /// Runs only the queue worker
    Worker(WorkerOptions),
    /// Runs only the cron scheduler
    Scheduler(SchedulerOptions),
    /// Migrate the postgres database
    Migrate(MigrateOptions),
}

#[derive(Debug, Clone, Parser)]
pub struct ServeOptions {
    #[arg(long, env = "PORT", default_value_t = 8000)]
    port: usize,
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    hostname: String,
}

#[derive(Debug, Clone, Parser)]
pub struct WorkerOptions {}

#[derive(Debug, Clone, Parser)]
pub struct SchedulerOptions {
    /// Concurrent claim loops inside this scheduler instance
    #[arg(long, default_value_t = 2)]
    tick_loops: usize,
}

#[derive(Debug, Clone, Parser)]
pub struct MigrateOptions {}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv_override();

    let cli = Cli::parse();
    let config = config::Config::load();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        None | Some(Commands::Serve(_)) => {
            let serve_options = match cli.command {
                Some(Commands::Serve(opts)) => opts,
                _ => cli.serve,
            };

            let pool = pg::create_pool(&config).await?;
            println!("Migrating database...");
            pg::migrate(&pool).await?;

            let (engine, registry) = engine::Engine::connect(&config, pool)?;
            engine.ensure_default_admin(&config).await?;

            let context = api::Context {
                engine: engine.clone(),
                secret_key: config.secret_key.clone(),
            };
            let api_config = api::Config {
                port: serve_options.port,
                hostname: serve_options.hostname,
            };

            select! {
              api_res = api::start(api_config, context) => {
                println!("Api Service Stopped.");
                api_res?;
              },
              worker_res = worker::start(engine.clone()) => {
                println!("Worker Service Stopped.");
                worker_res?;
              },
              scheduler_res = scheduler::start(registry, engine.clone(), 2) => {
                println!("Scheduler Service Stopped.");
                scheduler_res?;
              },
              _ = tokio::signal::ctrl_c() => println!("Received Ctrl-C.")
            }
        }
        Some(Commands::Api(serve_options)) => {
            let pool = pg::create_pool(&config).await?;
            let (engine, _registry) = engine::Engine::connect(&config, pool)?;
            engine.ensure_default_admin(&config).await?;

            let context = api::Context {
                engine,
                secret_key: config.secret_key.clone(),
            };
            let api_config = api::Config {
                port: serve_options.port,
                hostname: serve_options.hostname,
            };

            api::start(api_config, context).await?;
            println!("Api Service Stopped.");
        }
        Some(Commands::Worker(_)) => {
            let pool = pg::create_pool(&config).await?;
            let (engine, _registry) = engine::Engine::connect(&config, pool)?;

            worker::start(engine).await?;
            println!("Worker Service Stopped.");
        }
        Some(Commands::Scheduler(scheduler_options)) => {
            let pool = pg::create_pool(&config).await?;
            let (engine, registry) = engine::Engine::connect(&config, pool)?;

            scheduler::start(registry, engine, scheduler_options.tick_loops).await?;
            println!("Scheduler Service Stopped.");
        }
        Some(Commands::Migrate(_)) => {
            let pool = pg::create_pool(&config).await?;
            pg::migrate(&pool).await?;
        }
    }

    println!("Program stopped.");

    Ok(())
}
