use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use std::time::Duration;
use tracing::info;

use crate::config::AppConfig;

/// Opens the database connection pool described by the configuration.
pub async fn establish_connection(config: &AppConfig) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(config.database_url.clone());
    options
        .max_connections(config.db_max_connections)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);
    let db = Database::connect(options).await?;
    info!("database connection established");
    Ok(db)
}

/// Idempotent schema setup. Statements are portable across SQLite (tests)
/// and Postgres (production).
pub async fn run_migrations(db: &DatabaseConnection) -> Result<(), DbErr> {
    db.execute_unprepared(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id uuid PRIMARY KEY,
            order_number varchar(50) NOT NULL UNIQUE,
            customer_id uuid,
            customer_no varchar(64),
            customer_email varchar(255) NOT NULL,
            customer_locale varchar(16),
            status varchar(20) NOT NULL,
            export_status varchar(20) NOT NULL,
            payment_status varchar(20) NOT NULL,
            gateway_status varchar(40),
            currency varchar(3) NOT NULL,
            total_amount decimal(19,4) NOT NULL,
            shipping_total decimal(19,4) NOT NULL,
            tax_total decimal(19,4) NOT NULL,
            billing_address text,
            shipping_address text,
            payment_ledger text,
            refund_ids text,
            transaction_log text,
            notes text,
            placed_at timestamptz,
            created_at timestamptz NOT NULL,
            updated_at timestamptz,
            version integer NOT NULL
        );
        "#,
    )
    .await?;

    db.execute_unprepared(
        r#"
        CREATE TABLE IF NOT EXISTS order_lines (
            id uuid PRIMARY KEY,
            order_id uuid NOT NULL,
            position integer NOT NULL,
            product_code varchar(64) NOT NULL,
            description varchar(255) NOT NULL,
            quantity integer NOT NULL,
            base_unit_price decimal(19,4) NOT NULL,
            line_total decimal(19,4) NOT NULL,
            tax_amount decimal(19,4) NOT NULL
        );
        "#,
    )
    .await?;

    db.execute_unprepared(
        r#"
        CREATE TABLE IF NOT EXISTS payment_instruments (
            id uuid PRIMARY KEY,
            order_id uuid NOT NULL,
            processor varchar(32) NOT NULL,
            payment_method varchar(32) NOT NULL,
            transaction_id varchar(64),
            processor_reference varchar(64),
            hosted_checkout_id varchar(64),
            amount decimal(19,4),
            currency varchar(3),
            card_holder varchar(128),
            card_number_masked varchar(32),
            card_expiry_month integer,
            card_expiry_year integer,
            card_product_id integer,
            card_token varchar(64),
            created_at timestamptz NOT NULL,
            updated_at timestamptz
        );
        "#,
    )
    .await?;

    db.execute_unprepared(
        r#"
        CREATE TABLE IF NOT EXISTS customer_cards (
            id uuid PRIMARY KEY,
            customer_id uuid NOT NULL,
            card_product_id integer NOT NULL,
            masked_number varchar(32) NOT NULL,
            expiry_month integer NOT NULL,
            expiry_year integer NOT NULL,
            card_holder varchar(128),
            token varchar(64),
            created_at timestamptz NOT NULL,
            updated_at timestamptz
        );
        "#,
    )
    .await?;

    info!("database migrations applied");
    Ok(())
}
