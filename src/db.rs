use std::{env, fs, path::Path};

use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    auth::{hash_password, new_id},
    models::Role,
};

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = if let Some(path) = db_url.strip_prefix("sqlite://") {
        Some(path)
    } else if let Some(path) = db_url.strip_prefix("sqlite:") {
        Some(path)
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    let db_path = Path::new(path);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Seeds a demo provider account when SEED_PROVIDER=true and none exists yet.
pub async fn seed_defaults(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let seed = env::var("SEED_PROVIDER").unwrap_or_else(|_| "false".to_string());
    if seed != "true" {
        return Ok(());
    }

    let existing = sqlx::query_as::<_, (String,)>("SELECT id FROM users WHERE role = ? LIMIT 1")
        .bind(Role::Provider)
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let email = env::var("PROVIDER_EMAIL").unwrap_or_else(|_| "berber@example.com".to_string());
    let password = env::var("PROVIDER_PASSWORD").unwrap_or_else(|_| "change-me".to_string());
    if password == "change-me" {
        log::warn!("PROVIDER_PASSWORD not set. Using default password 'change-me'. Set PROVIDER_PASSWORD in production.");
    }

    let password_hash = hash_password(&password)
        .map_err(|_| sqlx::Error::Protocol("password hash failed".into()))?;

    sqlx::query(
        r#"INSERT INTO users (id, first_name, last_name, email, phone, role, password_hash, active, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?)"#,
    )
    .bind(new_id())
    .bind("Demo")
    .bind("Berber")
    .bind(email)
    .bind("")
    .bind(Role::Provider)
    .bind(password_hash)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}
