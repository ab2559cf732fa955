use config::{Config, Environment, File};
use sea_orm_migration::prelude::*;
use std::env;

/// Reads `database_url` the same way the server does: the YAML file named by
/// `CONFIG_FILE` with `__`-separated environment overrides on top.
fn database_url_from_config() -> Option<String> {
    let path = env::var("CONFIG_FILE").unwrap_or_else(|_| "config.yaml".to_string());
    let settings = Config::builder()
        .add_source(File::with_name(&path).required(false))
        .add_source(Environment::default().separator("__"))
        .build()
        .ok()?;
    settings
        .get_string("database_url")
        .ok()
        // the in-memory store has nothing to migrate
        .filter(|url| url != "memory")
}

#[tokio::main]
async fn main() {
    if env::var("DATABASE_URL").is_err() {
        if let Some(url) = database_url_from_config() {
            env::set_var("DATABASE_URL", url);
        }
    }
    cli::run_cli(migration::Migrator).await;
}
