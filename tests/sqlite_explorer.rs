#![cfg(feature = "sqlite")]

use sql_explorer::{
    params, ClientFactory, DatabaseClient, DatabaseConfig, DatabaseErrorKind, DatabaseExplorer,
    DatabaseType, SqlTemplate, SqlValue,
};

async fn memory_client() -> Box<dyn DatabaseClient> {
    ClientFactory::with_default_drivers()
        .create(DatabaseType::Sqlite, &DatabaseConfig::sqlite_in_memory())
        .await
        .unwrap()
}

async fn seeded_users(explorer: &DatabaseExplorer<'_>) {
    explorer
        .execute(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT UNIQUE, age INTEGER)",
            &params!(),
        )
        .await
        .unwrap();
    explorer
        .execute_many(
            "INSERT INTO users (name, email, age) VALUES (:name, :email, :age)",
            &[
                params! { "name" => "Alice", "email" => "alice@example.com", "age" => 30 },
                params! { "name" => "Bob", "email" => "bob@example.com", "age" => 25 },
                params! { "name" => "Charlie", "email" => "charlie@example.com", "age" => 35 },
            ],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn fetch_all_filters_with_bound_parameter() {
    let client = memory_client().await;
    let explorer = DatabaseExplorer::new(client.as_ref());
    seeded_users(&explorer).await;

    let rows = explorer
        .fetch_all("SELECT name FROM users WHERE age > :min_age ORDER BY name", &params! { "min_age" => 26 })
        .await
        .unwrap();
    let names: Vec<&str> = rows.iter().filter_map(|r| r.get("name").and_then(SqlValue::as_str)).collect();
    assert_eq!(names, vec!["Alice", "Charlie"]);

    let none = explorer
        .fetch_all("SELECT * FROM users WHERE age > :min_age", &params! { "min_age" => 100 })
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn injection_text_is_treated_as_a_value() {
    let client = memory_client().await;
    let explorer = DatabaseExplorer::new(client.as_ref());
    seeded_users(&explorer).await;

    let rows = explorer
        .fetch_all(
            "SELECT * FROM users WHERE name = :n",
            &params! { "n" => "'; DROP TABLE users; --" },
        )
        .await
        .unwrap();
    assert!(rows.is_empty());
    assert_eq!(explorer.count("users").await.unwrap(), 3);
}

#[tokio::test]
async fn find_by_id_returns_row_or_none() {
    let client = memory_client().await;
    let explorer = DatabaseExplorer::new(client.as_ref());
    seeded_users(&explorer).await;

    let alice = explorer.find_by_id("users", "id", 1).await.unwrap().unwrap();
    assert_eq!(alice.get("name"), Some(&SqlValue::Text("Alice".to_string())));
    assert_eq!(alice.columns(), ["id", "name", "email", "age"]);

    assert!(explorer.find_by_id("users", "id", 999).await.unwrap().is_none());
}

#[tokio::test]
async fn find_by_id_on_duplicate_keys_is_multiple_rows() {
    let client = memory_client().await;
    let explorer = DatabaseExplorer::new(client.as_ref());

    explorer
        .execute("CREATE TABLE events (id INTEGER, kind TEXT)", &params!())
        .await
        .unwrap();
    explorer
        .execute_many(
            "INSERT INTO events (id, kind) VALUES (:id, :kind)",
            &[params! { "id" => 123, "kind" => "a" }, params! { "id" => 123, "kind" => "b" }],
        )
        .await
        .unwrap();

    let err = explorer.find_by_id("events", "id", 123).await.unwrap_err();
    assert_eq!(err.kind(), DatabaseErrorKind::MultipleRows);
}

#[tokio::test]
async fn count_tracks_inserts() {
    let client = memory_client().await;
    let explorer = DatabaseExplorer::new(client.as_ref());

    explorer
        .execute("CREATE TABLE empty_table (id INTEGER PRIMARY KEY)", &params!())
        .await
        .unwrap();
    assert_eq!(explorer.count("empty_table").await.unwrap(), 0);

    let batch: Vec<_> = (1..=5).map(|id| params! { "id" => id }).collect();
    let inserted = explorer
        .execute_many("INSERT INTO empty_table (id) VALUES (:id)", &batch)
        .await
        .unwrap();
    assert_eq!(inserted, 5);
    assert_eq!(explorer.count("empty_table").await.unwrap(), 5);
}

#[tokio::test]
async fn exists_matches_bound_value() {
    let client = memory_client().await;
    let explorer = DatabaseExplorer::new(client.as_ref());
    seeded_users(&explorer).await;

    assert!(explorer.exists("users", "name", "Alice").await.unwrap());
    assert!(!explorer.exists("users", "name", "Dave").await.unwrap());
}

#[tokio::test]
async fn find_all_honours_limit() {
    let client = memory_client().await;
    let explorer = DatabaseExplorer::new(client.as_ref());
    seeded_users(&explorer).await;

    assert_eq!(explorer.find_all("users", None).await.unwrap().len(), 3);
    assert_eq!(explorer.find_all("users", Some(2)).await.unwrap().len(), 2);
}

#[tokio::test]
async fn injected_table_name_is_rejected_and_table_survives() {
    let client = memory_client().await;
    let explorer = DatabaseExplorer::new(client.as_ref());
    seeded_users(&explorer).await;

    let err = explorer
        .find_by_id("users; DROP TABLE users;", "id", 1)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), DatabaseErrorKind::InvalidIdentifier);
    assert_eq!(explorer.count("users").await.unwrap(), 3);
}

#[tokio::test]
async fn missing_parameter_is_query_error() {
    let client = memory_client().await;
    let explorer = DatabaseExplorer::new(client.as_ref());
    seeded_users(&explorer).await;

    let err = explorer
        .fetch_all("SELECT * FROM users WHERE age > :min_age", &params!())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), DatabaseErrorKind::Query);
}

#[tokio::test]
async fn close_is_idempotent_and_blocks_further_use() {
    let client = memory_client().await;
    assert!(client.is_alive().await);

    client.close().await.unwrap();
    client.close().await.unwrap();
    assert!(client.is_closed().await);

    let err = client
        .execute(&SqlTemplate::new("SELECT 1"), &params!())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), DatabaseErrorKind::ClosedConnection);

    let explorer = DatabaseExplorer::new(client.as_ref());
    let err = explorer.count("users").await.unwrap_err();
    assert_eq!(err.kind(), DatabaseErrorKind::ClosedConnection);

    // a missing value must not mask the closed connection
    let err = explorer
        .fetch_all("SELECT * FROM users WHERE id = :id", &params!())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), DatabaseErrorKind::ClosedConnection);
}

#[tokio::test]
async fn returning_clause_yields_rows() {
    let client = memory_client().await;
    let explorer = DatabaseExplorer::new(client.as_ref());
    seeded_users(&explorer).await;

    let inserted = explorer
        .fetch_one(
            "INSERT INTO users (name, email, age) VALUES (:name, :email, :age) RETURNING id, name",
            &params! { "name" => "Dave", "email" => "dave@example.com", "age" => 41 },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(inserted.get("id"), Some(&SqlValue::Int(4)));
    assert_eq!(inserted.get("name").and_then(SqlValue::as_str), Some("Dave"));
}

#[tokio::test]
async fn file_database_persists_across_clients() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("explorer.db");
    let url = format!("sqlite:///{}", path.display());
    let factory = ClientFactory::with_default_drivers();

    {
        let client = factory.create_from_url(&url).await.unwrap();
        let explorer = DatabaseExplorer::new(client.as_ref());
        seeded_users(&explorer).await;
        client.close().await.unwrap();
    }

    let client = factory
        .create_from_tag("sqlite", &DatabaseConfig::sqlite(path.to_string_lossy()))
        .await
        .unwrap();
    let explorer = DatabaseExplorer::new(client.as_ref());
    assert_eq!(explorer.count("users").await.unwrap(), 3);
}

#[tokio::test]
async fn unknown_type_tag_is_unsupported() {
    let err = ClientFactory::with_default_drivers()
        .create_from_tag("oracle", &DatabaseConfig::sqlite_in_memory())
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), DatabaseErrorKind::UnsupportedDatabase);
}

#[tokio::test]
async fn rows_serialize_as_ordered_objects() {
    let client = memory_client().await;
    let explorer = DatabaseExplorer::new(client.as_ref());
    seeded_users(&explorer).await;

    let bob = explorer
        .fetch_one("SELECT name, age FROM users WHERE email = :email", &params! { "email" => "bob@example.com" })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(serde_json::to_string(&bob).unwrap(), r#"{"name":"Bob","age":25}"#);
}
