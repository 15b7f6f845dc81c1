// Explorer demo: seeds a users table in an in-memory SQLite database and
// runs every explorer helper against it.
//
//   RUST_LOG=debug cargo run --bin explorer_demo

use sql_explorer::{params, ClientFactory, DatabaseConfig, DatabaseExplorer, SqlValue};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CREATE_USERS: &str = "
    CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT UNIQUE,
        age INTEGER
    )";

const INSERT_USER: &str = "INSERT INTO users (name, email, age) VALUES (:name, :email, :age)";

async fn run(explorer: &DatabaseExplorer<'_>) -> sql_explorer::Result<()> {
    explorer.execute(CREATE_USERS, &params!()).await?;

    for (name, email, age) in [
        ("Alice", "alice@example.com", 30),
        ("Bob", "bob@example.com", 25),
        ("Charlie", "charlie@example.com", 35),
    ] {
        explorer
            .execute(INSERT_USER, &params! { "name" => name, "email" => email, "age" => age })
            .await?;
    }

    println!("Users older than 26:");
    let users = explorer
        .fetch_all("SELECT * FROM users WHERE age > :min_age", &params! { "min_age" => 26 })
        .await?;
    for user in &users {
        println!(
            "  {} ({})",
            user.get("name").and_then(SqlValue::as_str).unwrap_or("?"),
            user.get("age").and_then(SqlValue::as_i64).unwrap_or_default()
        );
    }

    println!("\nFind user by email:");
    let bob = explorer
        .fetch_one("SELECT * FROM users WHERE email = :email", &params! { "email" => "bob@example.com" })
        .await?;
    if let Some(bob) = bob {
        println!("  Found: {}", bob.get("name").and_then(SqlValue::as_str).unwrap_or("?"));
    }

    println!("\nConvenience methods:");
    println!("  Total users: {}", explorer.count("users").await?);
    if let Some(first) = explorer.find_by_id("users", "id", 1).await? {
        println!("  User #1: {}", first.get("name").and_then(SqlValue::as_str).unwrap_or("?"));
    }
    println!("  Has Alice? {}", explorer.exists("users", "name", "Alice").await?);
    println!("  Has Dave? {}", explorer.exists("users", "name", "Dave").await?);

    let first_two = explorer.find_all("users", Some(2)).await?;
    println!("  First two as JSON: {}", serde_json::to_string(&first_two).unwrap_or_default());

    Ok(())
}

#[tokio::main]
async fn main() -> sql_explorer::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,sql_explorer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = DatabaseConfig::sqlite_in_memory().with_echo(std::env::var_os("SQL_EXPLORER_ECHO").is_some());
    let factory = ClientFactory::with_default_drivers();
    let client = factory.create_from_config(&config).await?;

    let explorer = DatabaseExplorer::new(client.as_ref());
    let outcome = run(&explorer).await;

    // released on every path, including a failed run
    client.close().await?;
    outcome
}
