use std::env;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use dealroom::{
    auth::password,
    config::AppConfig,
    db,
    models::NewUser,
    services::normalize_email,
    store::{PgStore, UserStore},
};

const USAGE: &str = "Usage: maintenance create-user <email> <password> [display name]";
const ACCOUNT_ROLE: &str = "user";
const MIN_PASSWORD_LEN: usize = 8;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("create-user") => {
            let email = args.next().ok_or_else(|| anyhow!(USAGE))?;
            let password = args.next().ok_or_else(|| anyhow!(USAGE))?;
            let display_name = args.collect::<Vec<_>>().join(" ");
            create_user(&email, &password, display_name).await?
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn create_user(email: &str, password: &str, display_name: String) -> Result<()> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        "loaded backend configuration"
    );

    let email = normalize_email(email)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(anyhow!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        ));
    }

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    db::run_migrations(&pool)?;
    let store = PgStore::new(pool);

    if store
        .find_user_by_email(&email)
        .await?
        .is_some()
    {
        return Err(anyhow!("a user with email {email} already exists"));
    }

    let password_hash = password::hash_password(password).context("failed to hash password")?;
    let display_name = Some(display_name.trim().to_string()).filter(|name| !name.is_empty());
    let user = store
        .insert_user(NewUser {
            id: Uuid::new_v4(),
            email,
            display_name,
            password_hash,
            role: ACCOUNT_ROLE.to_string(),
        })
        .await?;

    println!("Created user {} ({})", user.email, user.id);
    Ok(())
}
