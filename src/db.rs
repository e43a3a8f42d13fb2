use crate::config::AppConfig;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, Statement};
use std::time::Duration;
use tracing::info;

/// Shared connection handle used throughout the service layer.
pub type DbPool = DatabaseConnection;

/// Opens the database connection pool described by the configuration.
pub async fn establish_connection(config: &AppConfig) -> Result<DbPool, DbErr> {
    let mut opts = ConnectOptions::new(config.database_url.clone());
    opts.max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .connect_timeout(Duration::from_secs(config.db_connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.db_idle_timeout_secs))
        .acquire_timeout(Duration::from_secs(config.db_acquire_timeout_secs))
        .sqlx_logging(true);

    let db = Database::connect(opts).await?;
    info!("Database connection established");
    Ok(db)
}

/// Creates the commerce tables when they do not exist yet.
///
/// Invoked on startup when `auto_migrate` is set and by the test harness.
pub async fn ensure_schema(db: &DbPool) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let statements = match backend {
        DbBackend::Sqlite => sqlite_schema(),
        _ => postgres_schema(),
    };
    for sql in statements {
        db.execute(Statement::from_string(backend, sql.to_string()))
            .await?;
    }
    Ok(())
}

fn sqlite_schema() -> Vec<&'static str> {
    vec![
        r#"CREATE TABLE IF NOT EXISTS carts (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            total_price INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS cart_items (
            id TEXT PRIMARY KEY,
            cart_id TEXT NOT NULL,
            product_id TEXT NOT NULL,
            product_name TEXT NOT NULL,
            image TEXT,
            quantity INTEGER NOT NULL,
            unit_price INTEGER NOT NULL,
            weight_grams INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            username TEXT NOT NULL,
            email TEXT NOT NULL,
            address TEXT NOT NULL,
            phone TEXT,
            status TEXT NOT NULL,
            payment_status TEXT NOT NULL,
            payment_method TEXT NOT NULL,
            shipping_method TEXT NOT NULL,
            shipping_fee INTEGER NOT NULL DEFAULT 0,
            total INTEGER NOT NULL DEFAULT 0,
            payment_intent_id TEXT NOT NULL DEFAULT '',
            gateway_session_id TEXT NOT NULL DEFAULT '',
            refund_reason TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS order_items (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL,
            product_id TEXT NOT NULL,
            product_name TEXT NOT NULL,
            image TEXT,
            quantity INTEGER NOT NULL,
            unit_price INTEGER NOT NULL,
            weight_grams INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS order_interactions (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL,
            staff_id TEXT NOT NULL,
            action TEXT NOT NULL,
            created_at TEXT NOT NULL
        )"#,
        "CREATE INDEX IF NOT EXISTS idx_cart_items_cart ON cart_items(cart_id)",
        "CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_orders_intent ON orders(payment_intent_id)",
        "CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id)",
        "CREATE INDEX IF NOT EXISTS idx_order_interactions_order ON order_interactions(order_id)",
    ]
}

fn postgres_schema() -> Vec<&'static str> {
    vec![
        r#"CREATE TABLE IF NOT EXISTS carts (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL UNIQUE,
            total_price BIGINT NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS cart_items (
            id UUID PRIMARY KEY,
            cart_id UUID NOT NULL,
            product_id UUID NOT NULL,
            product_name TEXT NOT NULL,
            image TEXT,
            quantity INTEGER NOT NULL,
            unit_price BIGINT NOT NULL,
            weight_grams INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS orders (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL,
            username TEXT NOT NULL,
            email TEXT NOT NULL,
            address TEXT NOT NULL,
            phone TEXT,
            status TEXT NOT NULL,
            payment_status TEXT NOT NULL,
            payment_method TEXT NOT NULL,
            shipping_method TEXT NOT NULL,
            shipping_fee BIGINT NOT NULL DEFAULT 0,
            total BIGINT NOT NULL DEFAULT 0,
            payment_intent_id TEXT NOT NULL DEFAULT '',
            gateway_session_id TEXT NOT NULL DEFAULT '',
            refund_reason TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS order_items (
            id UUID PRIMARY KEY,
            order_id UUID NOT NULL,
            product_id UUID NOT NULL,
            product_name TEXT NOT NULL,
            image TEXT,
            quantity INTEGER NOT NULL,
            unit_price BIGINT NOT NULL,
            weight_grams INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS order_interactions (
            id UUID PRIMARY KEY,
            order_id UUID NOT NULL,
            staff_id UUID NOT NULL,
            action TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )"#,
        "CREATE INDEX IF NOT EXISTS idx_cart_items_cart ON cart_items(cart_id)",
        "CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_orders_intent ON orders(payment_intent_id)",
        "CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id)",
        "CREATE INDEX IF NOT EXISTS idx_order_interactions_order ON order_interactions(order_id)",
    ]
}
