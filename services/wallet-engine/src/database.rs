use crate::config::DatabaseConfig;
use crate::errors::{Result, WalletEngineError};
use crate::models::{
    Direction, EntryStatus, EntryType, LedgerEntry, NewLedgerEntry, UserId, Wallet, WalletId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Schema bootstrap. Every statement is idempotent.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email TEXT NOT NULL UNIQUE,
        full_name TEXT NOT NULL,
        nim_nip TEXT,
        role TEXT NOT NULL CHECK (role IN ('admin', 'dosen', 'mahasiswa', 'merchant')),
        status TEXT NOT NULL DEFAULT 'active',
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS wallets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL UNIQUE REFERENCES users(id),
        balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
        last_sync_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS wallet_transactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        wallet_id INTEGER NOT NULL REFERENCES wallets(id),
        amount INTEGER NOT NULL CHECK (amount > 0),
        direction TEXT NOT NULL CHECK (direction IN ('credit', 'debit')),
        entry_type TEXT NOT NULL,
        status TEXT NOT NULL,
        reference_id INTEGER,
        description TEXT NOT NULL DEFAULT '',
        created_by TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_wallet_transactions_wallet ON wallet_transactions (wallet_id, created_at)",
    r#"
    CREATE TRIGGER IF NOT EXISTS wallet_transactions_no_update
    BEFORE UPDATE ON wallet_transactions
    BEGIN
        SELECT RAISE(ABORT, 'wallet transactions are append-only');
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS wallet_transactions_no_delete
    BEFORE DELETE ON wallet_transactions
    BEGIN
        SELECT RAISE(ABORT, 'wallet transactions are append-only');
    END
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS payment_tokens (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        token TEXT NOT NULL UNIQUE,
        wallet_id INTEGER NOT NULL REFERENCES wallets(id),
        amount INTEGER NOT NULL CHECK (amount > 0),
        merchant TEXT NOT NULL,
        purpose TEXT NOT NULL,
        status TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        consumed_by INTEGER REFERENCES wallets(id),
        consumed_at TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_payment_tokens_status ON payment_tokens (status, expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        price INTEGER NOT NULL CHECK (price > 0),
        stock INTEGER NOT NULL CHECK (stock >= 0),
        status TEXT NOT NULL,
        created_by INTEGER NOT NULL REFERENCES users(id),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS marketplace_transactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        wallet_id INTEGER NOT NULL REFERENCES wallets(id),
        product_id INTEGER NOT NULL REFERENCES products(id),
        amount INTEGER NOT NULL,
        total_amount INTEGER NOT NULL,
        quantity INTEGER NOT NULL CHECK (quantity > 0),
        buyer_name TEXT NOT NULL,
        buyer_npm TEXT NOT NULL,
        buyer_major TEXT NOT NULL,
        buyer_batch TEXT NOT NULL,
        payment_method TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS missions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        creator_id INTEGER NOT NULL REFERENCES users(id),
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        mission_type TEXT NOT NULL,
        points INTEGER NOT NULL CHECK (points > 0),
        deadline TEXT,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS mission_submissions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        mission_id INTEGER NOT NULL REFERENCES missions(id),
        student_id INTEGER NOT NULL REFERENCES users(id),
        content TEXT NOT NULL,
        file_url TEXT,
        score INTEGER,
        status TEXT NOT NULL,
        reviewed_by INTEGER REFERENCES users(id),
        review_note TEXT,
        submitted_at TEXT NOT NULL,
        reviewed_at TEXT,
        UNIQUE (mission_id, student_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS external_sources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        endpoint TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS external_point_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        wallet_id INTEGER NOT NULL REFERENCES wallets(id),
        source_id INTEGER NOT NULL REFERENCES external_sources(id),
        external_transaction_id TEXT NOT NULL UNIQUE,
        amount INTEGER NOT NULL CHECK (amount > 0),
        metadata TEXT,
        status TEXT NOT NULL,
        synced_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transfers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        sender_wallet_id INTEGER NOT NULL REFERENCES wallets(id),
        receiver_wallet_id INTEGER NOT NULL REFERENCES wallets(id),
        amount INTEGER NOT NULL CHECK (amount > 0),
        description TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS activity_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        actor_id INTEGER NOT NULL,
        action TEXT NOT NULL,
        entity TEXT NOT NULL,
        entity_id INTEGER NOT NULL,
        detail TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
];

/// One database transaction. Dropping it without `commit` rolls back.
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

impl UnitOfWork {
    pub(crate) fn conn(&mut self) -> &mut SqliteConnection {
        &mut *self.tx
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Filters accepted by the transaction listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub entry_type: Option<EntryType>,
    pub status: Option<EntryStatus>,
    pub direction: Option<Direction>,
    pub wallet_id: Option<WalletId>,
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

impl Page {
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    /// Page 0 becomes 1, limit 0 becomes the default, oversize limits are capped.
    pub fn normalized(self, default_limit: u32, max_limit: u32) -> Self {
        let page = self.page.max(1);
        let limit = match self.limit {
            0 => default_limit,
            l if l > max_limit => max_limit,
            l => l,
        };
        Self { page, limit }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.limit)
    }
}

/// Appends ` AND ...` clauses for every filter that is set.
pub(crate) fn push_entry_filters(
    builder: &mut QueryBuilder<'_, Sqlite>,
    filter: &TransactionFilter,
    prefix: &str,
) {
    if let Some(entry_type) = filter.entry_type {
        builder.push(format!(" AND {}entry_type = ", prefix));
        builder.push_bind(entry_type);
    }
    if let Some(status) = filter.status {
        builder.push(format!(" AND {}status = ", prefix));
        builder.push_bind(status);
    }
    if let Some(direction) = filter.direction {
        builder.push(format!(" AND {}direction = ", prefix));
        builder.push_bind(direction);
    }
    if let Some(wallet_id) = filter.wallet_id {
        builder.push(format!(" AND {}wallet_id = ", prefix));
        builder.push_bind(wallet_id);
    }
    if let Some(from) = filter.from {
        builder.push(format!(" AND {}created_at >= ", prefix));
        builder.push_bind(from);
    }
    if let Some(to) = filter.to {
        builder.push(format!(" AND {}created_at < ", prefix));
        builder.push_bind(to);
    }
}

/// Durable wallet balances plus the append-only transaction log.
pub struct LedgerStore {
    pool: SqlitePool,
}

impl LedgerStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let in_memory = config.url.contains(":memory:") || config.url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

        let pool_options = if in_memory {
            single_connection_pool()
        } else {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
            SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(Duration::from_secs(config.busy_timeout_secs.max(5)))
        };

        let pool = pool_options.connect_with(options).await?;
        let store = LedgerStore { pool };
        store.init_schema().await?;

        info!("Ledger store ready at {}", config.url);
        Ok(store)
    }

    /// Private in-memory database on a single pinned connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = single_connection_pool().connect_with(options).await?;

        let store = LedgerStore { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Schema bootstrap applied ({} statements)", SCHEMA.len());
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<UnitOfWork> {
        let tx = self.pool.begin().await?;
        Ok(UnitOfWork { tx })
    }

    /// Create the wallet of a freshly inserted user.
    pub async fn create_wallet(
        &self,
        uow: &mut UnitOfWork,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<Wallet> {
        let wallet = sqlx::query_as::<_, Wallet>(
            r#"
            INSERT INTO wallets (user_id, balance, created_at, updated_at)
            VALUES ($1, 0, $2, $2)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(at)
        .fetch_one(uow.conn())
        .await
        .map_err(|e| {
            WalletEngineError::on_unique_violation(e, || {
                WalletEngineError::DuplicateOperation(format!("user {} already has a wallet", user_id))
            })
        })?;

        Ok(wallet)
    }

    pub async fn get_wallet(&self, wallet_id: WalletId) -> Result<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE id = $1")
            .bind(wallet_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(wallet)
    }

    pub async fn wallet_for_user(&self, user_id: UserId) -> Result<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(wallet)
    }

    pub async fn get_wallet_in(
        &self,
        uow: &mut UnitOfWork,
        wallet_id: WalletId,
    ) -> Result<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE id = $1")
            .bind(wallet_id)
            .fetch_optional(uow.conn())
            .await?;

        Ok(wallet)
    }

    pub async fn wallet_for_user_in(
        &self,
        uow: &mut UnitOfWork,
        user_id: UserId,
    ) -> Result<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(uow.conn())
            .await?;

        Ok(wallet)
    }

    pub async fn get_balance(&self, uow: &mut UnitOfWork, wallet_id: WalletId) -> Result<i64> {
        let balance: Option<i64> = sqlx::query_scalar("SELECT balance FROM wallets WHERE id = $1")
            .bind(wallet_id)
            .fetch_optional(uow.conn())
            .await?;

        balance.ok_or_else(|| WalletEngineError::not_found("wallet", wallet_id))
    }

    pub async fn set_balance(
        &self,
        uow: &mut UnitOfWork,
        wallet_id: WalletId,
        new_value: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE wallets SET balance = $1, updated_at = $2 WHERE id = $3")
            .bind(new_value)
            .bind(at)
            .bind(wallet_id)
            .execute(uow.conn())
            .await?;

        if result.rows_affected() == 0 {
            return Err(WalletEngineError::not_found("wallet", wallet_id));
        }
        Ok(())
    }

    /// Applies `delta` only if the result stays within `0..=i64::MAX`. Returns
    /// the new balance, or `None` when the wallet is missing or the result
    /// would leave that range.
    pub async fn add_delta(
        &self,
        uow: &mut UnitOfWork,
        wallet_id: WalletId,
        delta: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        if delta == i64::MIN {
            return Ok(None);
        }

        // Bounds are written so SQLite never evaluates an overflowing sum.
        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE wallets
            SET balance = balance + $1,
                updated_at = $2
            WHERE id = $3 AND balance >= -$1 AND balance <= $4 - MAX($1, 0)
            RETURNING balance
            "#,
        )
        .bind(delta)
        .bind(at)
        .bind(wallet_id)
        .bind(i64::MAX)
        .fetch_optional(uow.conn())
        .await?;

        Ok(balance)
    }

    /// Takes the write lock on the wallet row before the caller reads it.
    pub async fn lock_wallet(
        &self,
        uow: &mut UnitOfWork,
        wallet_id: WalletId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE wallets SET updated_at = $1 WHERE id = $2")
            .bind(at)
            .bind(wallet_id)
            .execute(uow.conn())
            .await?;

        if result.rows_affected() == 0 {
            return Err(WalletEngineError::not_found("wallet", wallet_id));
        }
        Ok(())
    }

    pub async fn touch_last_sync(
        &self,
        uow: &mut UnitOfWork,
        wallet_id: WalletId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let result =
            sqlx::query("UPDATE wallets SET last_sync_at = $1, updated_at = $1 WHERE id = $2")
                .bind(at)
                .bind(wallet_id)
                .execute(uow.conn())
                .await?;

        if result.rows_affected() == 0 {
            return Err(WalletEngineError::not_found("wallet", wallet_id));
        }
        Ok(())
    }

    pub async fn append_entry(
        &self,
        uow: &mut UnitOfWork,
        entry: &NewLedgerEntry,
    ) -> Result<LedgerEntry> {
        let entry = sqlx::query_as::<_, LedgerEntry>(
            r#"
            INSERT INTO wallet_transactions
                (wallet_id, amount, direction, entry_type, status, reference_id, description, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(entry.wallet_id)
        .bind(entry.amount)
        .bind(entry.direction)
        .bind(entry.entry_type)
        .bind(entry.status)
        .bind(entry.reference_id)
        .bind(&entry.description)
        .bind(entry.created_by)
        .bind(entry.created_at)
        .fetch_one(uow.conn())
        .await?;

        Ok(entry)
    }

    /// Newest first. The page is applied as given.
    pub async fn list_entries(
        &self,
        filter: &TransactionFilter,
        page: Page,
    ) -> Result<(Vec<LedgerEntry>, i64)> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM wallet_transactions WHERE 1 = 1");
        push_entry_filters(&mut count, filter, "");
        let (total,): (i64,) = count.build_query_as().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM wallet_transactions WHERE 1 = 1");
        push_entry_filters(&mut query, filter, "");
        query.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        query.push_bind(i64::from(page.limit));
        query.push(" OFFSET ");
        query.push_bind(page.offset());

        let entries = query
            .build_query_as::<LedgerEntry>()
            .fetch_all(&self.pool)
            .await?;

        Ok((entries, total))
    }

    /// Full history of one wallet, oldest first.
    pub async fn entries_for_wallet(&self, wallet_id: WalletId) -> Result<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            "SELECT * FROM wallet_transactions WHERE wallet_id = $1 ORDER BY id ASC",
        )
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

fn single_connection_pool() -> SqlitePoolOptions {
    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .acquire_timeout(Duration::from_secs(30))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{Originator, Posting};
    use chrono::TimeZone;

    /// Inserts a user with a wallet holding `balance` and returns the wallet ID.
    pub(crate) async fn seed_wallet(store: &LedgerStore, email: &str, balance: i64) -> WalletId {
        let now = Utc::now();
        let mut uow = store.begin().await.unwrap();
        let user_id: i64 = sqlx::query_scalar(
            "INSERT INTO users (email, full_name, role, status, created_at) VALUES ($1, $1, 'mahasiswa', 'active', $2) RETURNING id",
        )
        .bind(email)
        .bind(now)
        .fetch_one(uow.conn())
        .await
        .unwrap();
        let wallet = store.create_wallet(&mut uow, user_id, now).await.unwrap();
        store.set_balance(&mut uow, wallet.id, balance, now).await.unwrap();
        uow.commit().await.unwrap();
        wallet.id
    }

    fn entry(wallet_id: WalletId, amount: i64, direction: Direction) -> NewLedgerEntry {
        Posting::new(EntryType::Adjustment, "test entry")
            .by(Originator::Admin)
            .into_entry(wallet_id, amount, direction, Utc::now())
    }

    #[tokio::test]
    async fn test_add_delta_is_conditional() {
        let store = LedgerStore::in_memory().await.unwrap();
        let wallet_id = seed_wallet(&store, "a@campus.id", 100).await;

        let now = Utc::now();
        let mut uow = store.begin().await.unwrap();
        assert_eq!(store.add_delta(&mut uow, wallet_id, -40, now).await.unwrap(), Some(60));
        assert_eq!(store.add_delta(&mut uow, wallet_id, -61, now).await.unwrap(), None);
        assert_eq!(store.add_delta(&mut uow, 9999, 10, now).await.unwrap(), None);
        assert_eq!(store.get_balance(&mut uow, wallet_id).await.unwrap(), 60);
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_add_delta_refuses_to_overflow() {
        let store = LedgerStore::in_memory().await.unwrap();
        let wallet_id = seed_wallet(&store, "overflow@campus.id", 10).await;
        let now = Utc::now();

        let mut uow = store.begin().await.unwrap();
        assert_eq!(store.add_delta(&mut uow, wallet_id, i64::MAX, now).await.unwrap(), None);
        assert_eq!(
            store.add_delta(&mut uow, wallet_id, i64::MAX - 10, now).await.unwrap(),
            Some(i64::MAX)
        );
        assert_eq!(store.add_delta(&mut uow, wallet_id, 1, now).await.unwrap(), None);
        assert_eq!(store.add_delta(&mut uow, wallet_id, i64::MIN, now).await.unwrap(), None);
        assert_eq!(store.get_balance(&mut uow, wallet_id).await.unwrap(), i64::MAX);
    }

    #[tokio::test]
    async fn test_writes_use_the_supplied_timestamp() {
        let store = LedgerStore::in_memory().await.unwrap();
        let wallet_id = seed_wallet(&store, "stamp@campus.id", 10).await;
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();

        let mut uow = store.begin().await.unwrap();
        store.add_delta(&mut uow, wallet_id, 5, at).await.unwrap();
        uow.commit().await.unwrap();
        let wallet = store.get_wallet(wallet_id).await.unwrap().unwrap();
        assert_eq!(wallet.updated_at, at);

        let later = at + chrono::Duration::hours(1);
        let mut uow = store.begin().await.unwrap();
        store.lock_wallet(&mut uow, wallet_id, later).await.unwrap();
        uow.commit().await.unwrap();
        let wallet = store.get_wallet(wallet_id).await.unwrap().unwrap();
        assert_eq!(wallet.updated_at, later);
        assert_eq!(wallet.balance, 15);
    }

    #[tokio::test]
    async fn test_dropped_unit_of_work_rolls_back() {
        let store = LedgerStore::in_memory().await.unwrap();
        let wallet_id = seed_wallet(&store, "b@campus.id", 100).await;

        {
            let mut uow = store.begin().await.unwrap();
            store.add_delta(&mut uow, wallet_id, 50, Utc::now()).await.unwrap();
            store
                .append_entry(&mut uow, &entry(wallet_id, 50, Direction::Credit))
                .await
                .unwrap();
        }

        let wallet = store.get_wallet(wallet_id).await.unwrap().unwrap();
        assert_eq!(wallet.balance, 100);
        assert!(store.entries_for_wallet(wallet_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_balance_check_constraint() {
        let store = LedgerStore::in_memory().await.unwrap();
        let wallet_id = seed_wallet(&store, "c@campus.id", 0).await;

        let mut uow = store.begin().await.unwrap();
        let result = store.set_balance(&mut uow, wallet_id, -1, Utc::now()).await;
        assert!(matches!(result, Err(WalletEngineError::Storage(_))));
    }

    #[tokio::test]
    async fn test_entries_are_append_only() {
        let store = LedgerStore::in_memory().await.unwrap();
        let wallet_id = seed_wallet(&store, "d@campus.id", 0).await;

        let mut uow = store.begin().await.unwrap();
        let written = store
            .append_entry(&mut uow, &entry(wallet_id, 25, Direction::Credit))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let update = sqlx::query("UPDATE wallet_transactions SET amount = 1 WHERE id = $1")
            .bind(written.id)
            .execute(store.pool())
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM wallet_transactions WHERE id = $1")
            .bind(written.id)
            .execute(store.pool())
            .await;
        assert!(delete.is_err());

        let entries = store.entries_for_wallet(wallet_id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, 25);
    }

    #[tokio::test]
    async fn test_list_entries_filters_and_pages() {
        let store = LedgerStore::in_memory().await.unwrap();
        let first = seed_wallet(&store, "e@campus.id", 0).await;
        let second = seed_wallet(&store, "f@campus.id", 0).await;

        let mut uow = store.begin().await.unwrap();
        for amount in 1..=5 {
            store
                .append_entry(&mut uow, &entry(first, amount, Direction::Credit))
                .await
                .unwrap();
        }
        store
            .append_entry(&mut uow, &entry(second, 9, Direction::Debit))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let filter = TransactionFilter {
            wallet_id: Some(first),
            ..Default::default()
        };
        let (entries, total) = store.list_entries(&filter, Page::new(2, 2)).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].amount, 3);

        let filter = TransactionFilter {
            direction: Some(Direction::Debit),
            ..Default::default()
        };
        let (entries, total) = store.list_entries(&filter, Page::default()).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(entries[0].wallet_id, second);
    }

    #[tokio::test]
    async fn test_file_database_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("wallet.db").display()),
            max_connections: 2,
            busy_timeout_secs: 5,
        };

        let wallet_id = {
            let store = LedgerStore::connect(&config).await.unwrap();
            let wallet_id = seed_wallet(&store, "g@campus.id", 42).await;
            store.pool().close().await;
            wallet_id
        };

        let store = LedgerStore::connect(&config).await.unwrap();
        let wallet = store.get_wallet(wallet_id).await.unwrap().unwrap();
        assert_eq!(wallet.balance, 42);
    }

    #[test]
    fn test_page_normalization() {
        assert_eq!(Page::new(0, 0).normalized(20, 100), Page::new(1, 20));
        assert_eq!(Page::new(3, 500).normalized(20, 100), Page::new(3, 100));
        assert_eq!(Page::new(3, 10).offset(), 20);
    }
}
