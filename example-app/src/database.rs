use sql_session_store::{DatabaseError, DatabaseService, SqlValue};

pub async fn setup(service: &dyn DatabaseService) -> Result<(), DatabaseError> {
    // Create teams table
    service
        .execute(
            r#"
            CREATE TABLE IF NOT EXISTS teams (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL
            )
            "#,
            &[],
        )
        .await?;

    // Create users table with a foreign key to teams
    service
        .execute(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT UNIQUE NOT NULL,
                team_id INTEGER REFERENCES teams(id),
                is_active BOOLEAN DEFAULT true
            )
            "#,
            &[],
        )
        .await?;

    // Seed sample data
    service
        .execute(
            "INSERT INTO teams (name) VALUES (?), (?)",
            &[SqlValue::from("research"), SqlValue::from("platform")],
        )
        .await?;
    service
        .execute(
            "INSERT INTO users (name, email, team_id) VALUES \
             (?, ?, 1), (?, ?, 1), (?, ?, 2)",
            &[
                SqlValue::from("alice"),
                SqlValue::from("alice@example.com"),
                SqlValue::from("bob"),
                SqlValue::from("bob@example.com"),
                SqlValue::from("carol"),
                SqlValue::from("carol@example.com"),
            ],
        )
        .await?;

    Ok(())
}
