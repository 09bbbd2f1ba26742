//! Read-only views over balances and the transaction log.

use crate::clock::Clock;
use crate::config::ReportingConfig;
use crate::database::{push_entry_filters, LedgerStore, Page, TransactionFilter};
use crate::errors::{Result, WalletEngineError};
use crate::models::{
    Direction, EntryStatus, EntryType, LedgerEntry, Originator, PaymentMethod, RecordStatus,
    SubmissionStatus, UserId, UserRole, WalletId,
};
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use std::sync::Arc;

/// Ledger entry joined with its owner.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TransactionWithDetails {
    pub id: i64,
    pub wallet_id: WalletId,
    pub amount: i64,
    pub direction: Direction,
    pub entry_type: EntryType,
    pub status: EntryStatus,
    pub reference_id: Option<i64>,
    pub description: String,
    pub created_by: Originator,
    pub created_at: DateTime<Utc>,
    pub user_email: String,
    pub user_name: String,
    pub user_nim_nip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionPage {
    pub transactions: Vec<TransactionWithDetails>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WalletWithUser {
    pub wallet_id: WalletId,
    pub user_id: i64,
    pub balance: i64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub email: String,
    pub full_name: String,
    pub nim_nip: Option<String>,
    pub role: UserRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantStats {
    pub today_sales: i64,
    pub transaction_count: i64,
    pub total_balance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminStats {
    pub total_users: i64,
    pub active_users: i64,
    pub circulation_points: i64,
    pub today_transactions: i64,
    pub today_credits: i64,
    pub today_debits: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DosenStats {
    pub total_missions: i64,
    pub pending_reviews: i64,
    pub validated_submissions: i64,
}

/// Marketplace purchase joined with the product and the paying account.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PurchaseWithDetails {
    pub id: i64,
    pub wallet_id: WalletId,
    pub product_id: i64,
    pub product_name: String,
    pub amount: i64,
    pub total_amount: i64,
    pub quantity: i64,
    pub buyer_name: String,
    pub buyer_npm: String,
    pub buyer_major: String,
    pub buyer_batch: String,
    pub payment_method: PaymentMethod,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
    pub user_email: String,
    pub user_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchasePage {
    pub purchases: Vec<PurchaseWithDetails>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionFilter {
    pub mission_id: Option<i64>,
    pub student_id: Option<UserId>,
    /// Only submissions to missions created by this lecturer.
    pub creator_id: Option<UserId>,
    pub status: Option<SubmissionStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubmissionWithDetails {
    pub id: i64,
    pub mission_id: i64,
    pub mission_title: String,
    pub student_id: UserId,
    pub student_name: String,
    pub student_nim: Option<String>,
    pub content: String,
    pub file_url: Option<String>,
    pub score: Option<i64>,
    pub status: SubmissionStatus,
    pub reviewed_by: Option<UserId>,
    pub reviewer_name: Option<String>,
    pub review_note: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionPage {
    pub submissions: Vec<SubmissionWithDetails>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: i64,
}

const WALLET_WITH_USER: &str = r#"
    SELECT w.id AS wallet_id, w.user_id, w.balance, w.last_sync_at,
           u.email, u.full_name, u.nim_nip, u.role
    FROM wallets w
    JOIN users u ON u.id = w.user_id
"#;

pub struct ReportingService {
    store: Arc<LedgerStore>,
    clock: Arc<dyn Clock>,
    config: ReportingConfig,
    offset: FixedOffset,
}

impl ReportingService {
    pub fn new(store: Arc<LedgerStore>, clock: Arc<dyn Clock>, config: ReportingConfig) -> Self {
        let offset =
            FixedOffset::east_opt(config.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix());
        Self {
            store,
            clock,
            config,
            offset,
        }
    }

    pub async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: Page,
    ) -> Result<TransactionPage> {
        let page = page.normalized(self.config.default_page_size, self.config.max_page_size);

        let mut count =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM wallet_transactions t WHERE 1 = 1");
        push_entry_filters(&mut count, filter, "t.");
        let (total,): (i64,) = count.build_query_as().fetch_one(self.store.pool()).await?;

        let mut query = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT t.id, t.wallet_id, t.amount, t.direction, t.entry_type, t.status,
                   t.reference_id, t.description, t.created_by, t.created_at,
                   u.email AS user_email, u.full_name AS user_name, u.nim_nip AS user_nim_nip
            FROM wallet_transactions t
            JOIN wallets w ON w.id = t.wallet_id
            JOIN users u ON u.id = w.user_id
            WHERE 1 = 1
            "#,
        );
        push_entry_filters(&mut query, filter, "t.");
        query.push(" ORDER BY t.created_at DESC, t.id DESC LIMIT ");
        query.push_bind(i64::from(page.limit));
        query.push(" OFFSET ");
        query.push_bind(page.offset());

        let transactions = query
            .build_query_as::<TransactionWithDetails>()
            .fetch_all(self.store.pool())
            .await?;

        Ok(TransactionPage {
            transactions,
            total,
            page: page.page,
            limit: page.limit,
            total_pages: total_pages(total, page.limit),
        })
    }

    /// Most recent entries of one wallet.
    pub async fn wallet_transactions(&self, wallet_id: WalletId, limit: u32) -> Result<Vec<LedgerEntry>> {
        if self.store.get_wallet(wallet_id).await?.is_none() {
            return Err(WalletEngineError::not_found("wallet", wallet_id));
        }

        let filter = TransactionFilter {
            wallet_id: Some(wallet_id),
            ..Default::default()
        };
        let page = Page::new(1, limit).normalized(self.config.default_page_size, self.config.max_page_size);
        let (entries, _) = self.store.list_entries(&filter, page).await?;
        Ok(entries)
    }

    /// Students ranked by balance.
    pub async fn leaderboard(&self, limit: u32) -> Result<Vec<WalletWithUser>> {
        let limit = Page::new(1, limit)
            .normalized(self.config.default_page_size, self.config.max_page_size)
            .limit;

        let rows = sqlx::query_as::<_, WalletWithUser>(&format!(
            "{} WHERE u.role = $1 AND u.status = $2 ORDER BY w.balance DESC, w.id ASC LIMIT $3",
            WALLET_WITH_USER
        ))
        .bind(UserRole::Mahasiswa)
        .bind(RecordStatus::Active)
        .bind(i64::from(limit))
        .fetch_all(self.store.pool())
        .await?;

        Ok(rows)
    }

    pub async fn all_wallets(&self) -> Result<Vec<WalletWithUser>> {
        let rows = sqlx::query_as::<_, WalletWithUser>(&format!("{} ORDER BY w.id ASC", WALLET_WITH_USER))
            .fetch_all(self.store.pool())
            .await?;

        Ok(rows)
    }

    /// Today's sales for a merchant wallet plus its balance.
    pub async fn merchant_stats(&self, wallet_id: WalletId) -> Result<MerchantStats> {
        let wallet = self
            .store
            .get_wallet(wallet_id)
            .await?
            .ok_or_else(|| WalletEngineError::not_found("wallet", wallet_id))?;

        let sales: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT amount
            FROM wallet_transactions
            WHERE wallet_id = $1 AND entry_type = $2 AND status = $3 AND created_at >= $4
            "#,
        )
        .bind(wallet_id)
        .bind(EntryType::MarketplaceSale)
        .bind(EntryStatus::Success)
        .bind(self.start_of_today())
        .fetch_all(self.store.pool())
        .await?;

        Ok(MerchantStats {
            today_sales: checked_total(sales.iter().copied(), "today's sales")?,
            transaction_count: sales.len() as i64,
            total_balance: wallet.balance,
        })
    }

    pub async fn admin_stats(&self) -> Result<AdminStats> {
        let (total_users, active_users): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = $1 THEN 1 ELSE 0 END), 0) FROM users",
        )
        .bind(RecordStatus::Active)
        .fetch_one(self.store.pool())
        .await?;

        // Summed here rather than with SQL SUM, which errors on integer overflow.
        let balances: Vec<i64> = sqlx::query_scalar("SELECT balance FROM wallets")
            .fetch_all(self.store.pool())
            .await?;

        let today: Vec<(Direction, i64)> =
            sqlx::query_as("SELECT direction, amount FROM wallet_transactions WHERE created_at >= $1")
                .bind(self.start_of_today())
                .fetch_all(self.store.pool())
                .await?;

        Ok(AdminStats {
            total_users,
            active_users,
            circulation_points: checked_total(balances, "points in circulation")?,
            today_transactions: today.len() as i64,
            today_credits: checked_total(amounts_in(&today, Direction::Credit), "today's credits")?,
            today_debits: checked_total(amounts_in(&today, Direction::Debit), "today's debits")?,
        })
    }

    /// Lecturer dashboard counters.
    pub async fn dosen_stats(&self, dosen_id: UserId) -> Result<DosenStats> {
        let total_missions: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM missions WHERE creator_id = $1")
                .bind(dosen_id)
                .fetch_one(self.store.pool())
                .await?;

        let pending_reviews: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM mission_submissions s
            JOIN missions m ON m.id = s.mission_id
            WHERE m.creator_id = $1 AND s.status = $2
            "#,
        )
        .bind(dosen_id)
        .bind(SubmissionStatus::Pending)
        .fetch_one(self.store.pool())
        .await?;

        let validated_submissions: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM mission_submissions WHERE reviewed_by = $1")
                .bind(dosen_id)
                .fetch_one(self.store.pool())
                .await?;

        Ok(DosenStats {
            total_missions,
            pending_reviews,
            validated_submissions,
        })
    }

    /// Every marketplace purchase, newest first.
    pub async fn list_purchases(&self, page: Page) -> Result<PurchasePage> {
        let page = page.normalized(self.config.default_page_size, self.config.max_page_size);

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM marketplace_transactions")
            .fetch_one(self.store.pool())
            .await?;

        let purchases = sqlx::query_as::<_, PurchaseWithDetails>(
            r#"
            SELECT mt.id, mt.wallet_id, mt.product_id, p.name AS product_name,
                   mt.amount, mt.total_amount, mt.quantity,
                   mt.buyer_name, mt.buyer_npm, mt.buyer_major, mt.buyer_batch,
                   mt.payment_method, mt.status, mt.created_at,
                   u.email AS user_email, u.full_name AS user_name
            FROM marketplace_transactions mt
            JOIN products p ON p.id = mt.product_id
            JOIN wallets w ON w.id = mt.wallet_id
            JOIN users u ON u.id = w.user_id
            ORDER BY mt.created_at DESC, mt.id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::from(page.limit))
        .bind(page.offset())
        .fetch_all(self.store.pool())
        .await?;

        Ok(PurchasePage {
            purchases,
            total,
            page: page.page,
            limit: page.limit,
            total_pages: total_pages(total, page.limit),
        })
    }

    /// Mission submissions with mission, student and reviewer names, newest first.
    pub async fn list_submissions(
        &self,
        filter: &SubmissionFilter,
        page: Page,
    ) -> Result<SubmissionPage> {
        let page = page.normalized(self.config.default_page_size, self.config.max_page_size);

        let mut count = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM mission_submissions s JOIN missions m ON m.id = s.mission_id WHERE 1 = 1",
        );
        push_submission_filters(&mut count, filter);
        let (total,): (i64,) = count.build_query_as().fetch_one(self.store.pool()).await?;

        let mut query = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT s.id, s.mission_id, m.title AS mission_title,
                   s.student_id, st.full_name AS student_name, st.nim_nip AS student_nim,
                   s.content, s.file_url, s.score, s.status,
                   s.reviewed_by, rv.full_name AS reviewer_name, s.review_note,
                   s.submitted_at, s.reviewed_at
            FROM mission_submissions s
            JOIN missions m ON m.id = s.mission_id
            JOIN users st ON st.id = s.student_id
            LEFT JOIN users rv ON rv.id = s.reviewed_by
            WHERE 1 = 1
            "#,
        );
        push_submission_filters(&mut query, filter);
        query.push(" ORDER BY s.submitted_at DESC, s.id DESC LIMIT ");
        query.push_bind(i64::from(page.limit));
        query.push(" OFFSET ");
        query.push_bind(page.offset());

        let submissions = query
            .build_query_as::<SubmissionWithDetails>()
            .fetch_all(self.store.pool())
            .await?;

        Ok(SubmissionPage {
            submissions,
            total,
            page: page.page,
            limit: page.limit,
            total_pages: total_pages(total, page.limit),
        })
    }

    /// Midnight of the current local day, expressed in UTC.
    pub fn start_of_today(&self) -> DateTime<Utc> {
        let local = self.clock.now().with_timezone(&self.offset);
        let midnight = local.date_naive().and_time(NaiveTime::MIN);
        let utc = midnight - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        Utc.from_utc_datetime(&utc)
    }
}

fn push_submission_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &SubmissionFilter) {
    if let Some(mission_id) = filter.mission_id {
        query.push(" AND s.mission_id = ").push_bind(mission_id);
    }
    if let Some(student_id) = filter.student_id {
        query.push(" AND s.student_id = ").push_bind(student_id);
    }
    if let Some(creator_id) = filter.creator_id {
        query.push(" AND m.creator_id = ").push_bind(creator_id);
    }
    if let Some(status) = filter.status {
        query.push(" AND s.status = ").push_bind(status);
    }
}

fn amounts_in(
    rows: &[(Direction, i64)],
    direction: Direction,
) -> impl Iterator<Item = i64> + '_ {
    rows.iter()
        .filter(move |(d, _)| *d == direction)
        .map(|(_, amount)| *amount)
}

fn total_pages(total: i64, limit: u32) -> i64 {
    let limit = i64::from(limit);
    (total + limit - 1) / limit
}

fn checked_total(amounts: impl IntoIterator<Item = i64>, what: &str) -> Result<i64> {
    let sum: i128 = amounts.into_iter().map(i128::from).sum();
    i64::try_from(sum)
        .map_err(|_| WalletEngineError::InvalidState(format!("{} exceed the point range", what)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::database::tests::seed_wallet;
    use crate::models::Posting;

    #[tokio::test]
    async fn test_start_of_today_uses_campus_offset() {
        let store = Arc::new(LedgerStore::in_memory().await.unwrap());
        // 2024-06-01 20:30 UTC is already 2024-06-02 03:30 at +07:00.
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 20, 30, 0).unwrap(),
        ));
        let reporting = ReportingService::new(store, clock, ReportingConfig::default());

        assert_eq!(
            reporting.start_of_today(),
            Utc.with_ymd_and_hms(2024, 6, 1, 17, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_empty_ledger_stats() {
        let store = Arc::new(LedgerStore::in_memory().await.unwrap());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let reporting = ReportingService::new(store, clock, ReportingConfig::default());

        let stats = reporting.admin_stats().await.unwrap();
        assert_eq!(stats.total_users, 0);
        assert_eq!(stats.circulation_points, 0);
        assert_eq!(stats.today_debits, 0);

        let page = reporting
            .list_transactions(&TransactionFilter::default(), Page::new(0, 0))
            .await
            .unwrap();
        assert_eq!(page.total, 0);
        assert_eq!(page.total_pages, 0);
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, 20);
    }

    #[tokio::test]
    async fn test_oversized_totals_are_reported_not_wrapped() {
        let store = Arc::new(LedgerStore::in_memory().await.unwrap());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let reporting = ReportingService::new(store.clone(), clock.clone(), ReportingConfig::default());

        let half = i64::MAX / 2 + 1;
        let first = seed_wallet(&store, "rich@campus.id", half).await;
        seed_wallet(&store, "richer@campus.id", half).await;

        match reporting.admin_stats().await {
            Err(WalletEngineError::InvalidState(msg)) => assert!(msg.contains("circulation")),
            other => panic!("unexpected result: {:?}", other),
        }

        let mut uow = store.begin().await.unwrap();
        for _ in 0..2 {
            let sale = Posting::new(EntryType::MarketplaceSale, "bulk order")
                .into_entry(first, half, Direction::Credit, clock.now());
            store.append_entry(&mut uow, &sale).await.unwrap();
        }
        uow.commit().await.unwrap();

        match reporting.merchant_stats(first).await {
            Err(WalletEngineError::InvalidState(msg)) => assert!(msg.contains("sales")),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
