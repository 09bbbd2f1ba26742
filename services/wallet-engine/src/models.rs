use crate::errors::WalletEngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

pub type UserId = i64;
pub type WalletId = i64;

/// Text mapping shared by every enum stored as a TEXT column.
macro_rules! impl_text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = WalletEngineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(WalletEngineError::Validation(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

// ===== Users =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Dosen,
    Mahasiswa,
    Merchant,
}

impl_text_enum!(UserRole {
    Admin => "admin",
    Dosen => "dosen",
    Mahasiswa => "mahasiswa",
    Merchant => "merchant",
});

/// Active/inactive flag shared by users, products and external sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RecordStatus {
    Active,
    Inactive,
}

impl_text_enum!(RecordStatus {
    Active => "active",
    Inactive => "inactive",
});

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub full_name: String,
    pub nim_nip: Option<String>,
    pub role: UserRole,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub full_name: String,
    pub nim_nip: Option<String>,
    pub role: UserRole,
}

/// Caller identity as resolved by the authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: UserRole,
}

impl Actor {
    pub fn new(user_id: UserId, role: UserRole) -> Self {
        Self { user_id, role }
    }

    pub fn require_role(&self, allowed: &[UserRole], action: &str) -> Result<(), WalletEngineError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(WalletEngineError::Unauthorized(format!(
                "role '{}' may not {}",
                self.role, action
            )))
        }
    }
}

// ===== Wallets and ledger =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub balance: i64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum EntryType {
    Mission,
    TransferIn,
    TransferOut,
    Marketplace,
    MarketplaceSale,
    External,
    Adjustment,
    Topup,
}

impl_text_enum!(EntryType {
    Mission => "mission",
    TransferIn => "transfer_in",
    TransferOut => "transfer_out",
    Marketplace => "marketplace",
    MarketplaceSale => "marketplace_sale",
    External => "external",
    Adjustment => "adjustment",
    Topup => "topup",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Direction {
    Credit,
    Debit,
}

impl_text_enum!(Direction {
    Credit => "credit",
    Debit => "debit",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum EntryStatus {
    Success,
    Failed,
    Pending,
}

impl_text_enum!(EntryStatus {
    Success => "success",
    Failed => "failed",
    Pending => "pending",
});

/// Who initiated a balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Originator {
    System,
    Admin,
    Dosen,
}

impl_text_enum!(Originator {
    System => "system",
    Admin => "admin",
    Dosen => "dosen",
});

/// Immutable record of one balance change.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
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
}

impl LedgerEntry {
    /// Effect of this entry on the wallet balance.
    pub fn signed_amount(&self) -> i64 {
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub wallet_id: WalletId,
    pub amount: i64,
    pub direction: Direction,
    pub entry_type: EntryType,
    pub status: EntryStatus,
    pub reference_id: Option<i64>,
    pub description: String,
    pub created_by: Originator,
    pub created_at: DateTime<Utc>,
}

/// Classification attached to a credit or debit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub entry_type: EntryType,
    pub description: String,
    pub reference_id: Option<i64>,
    pub originator: Originator,
}

impl Posting {
    pub fn new(entry_type: EntryType, description: impl Into<String>) -> Self {
        Self {
            entry_type,
            description: description.into(),
            reference_id: None,
            originator: Originator::System,
        }
    }

    pub fn with_reference(mut self, reference_id: i64) -> Self {
        self.reference_id = Some(reference_id);
        self
    }

    pub fn by(mut self, originator: Originator) -> Self {
        self.originator = originator;
        self
    }

    pub(crate) fn into_entry(
        self,
        wallet_id: WalletId,
        amount: i64,
        direction: Direction,
        created_at: DateTime<Utc>,
    ) -> NewLedgerEntry {
        NewLedgerEntry {
            wallet_id,
            amount,
            direction,
            entry_type: self.entry_type,
            status: EntryStatus::Success,
            reference_id: self.reference_id,
            description: self.description,
            created_by: self.originator,
            created_at,
        }
    }
}

// ===== Payment tokens =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TokenStatus {
    Active,
    Consumed,
    Expired,
}

impl_text_enum!(TokenStatus {
    Active => "active",
    Consumed => "consumed",
    Expired => "expired",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TokenPurpose {
    Purchase,
    Transfer,
}

impl_text_enum!(TokenPurpose {
    Purchase => "purchase",
    Transfer => "transfer",
});

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentToken {
    pub id: i64,
    pub token: String,
    pub wallet_id: WalletId,
    pub amount: i64,
    pub merchant: String,
    pub purpose: TokenPurpose,
    pub status: TokenStatus,
    pub expires_at: DateTime<Utc>,
    pub consumed_by: Option<WalletId>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ===== Marketplace =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub price: i64,
    pub stock: i64,
    pub status: RecordStatus,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub price: i64,
    pub stock: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PaymentMethod {
    Wallet,
    Qr,
}

impl_text_enum!(PaymentMethod {
    Wallet => "wallet",
    Qr => "qr",
});

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PurchaseRecord {
    pub id: i64,
    pub wallet_id: WalletId,
    pub product_id: i64,
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
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub product_id: i64,
    pub quantity: Option<i64>,
    pub payment_token: Option<String>,
    pub buyer_name: String,
    pub buyer_npm: String,
    pub buyer_major: String,
    pub buyer_batch: String,
}

// ===== Missions =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum MissionType {
    Quiz,
    Task,
    Assignment,
}

impl_text_enum!(MissionType {
    Quiz => "quiz",
    Task => "task",
    Assignment => "assignment",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum MissionStatus {
    Active,
    Inactive,
    Expired,
}

impl_text_enum!(MissionStatus {
    Active => "active",
    Inactive => "inactive",
    Expired => "expired",
});

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Mission {
    pub id: i64,
    pub creator_id: UserId,
    pub title: String,
    pub description: String,
    pub mission_type: MissionType,
    pub points: i64,
    pub deadline: Option<DateTime<Utc>>,
    pub status: MissionStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMission {
    pub title: String,
    pub description: String,
    pub mission_type: MissionType,
    pub points: i64,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
}

impl_text_enum!(SubmissionStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MissionSubmission {
    pub id: i64,
    pub mission_id: i64,
    pub student_id: UserId,
    pub content: String,
    pub file_url: Option<String>,
    pub score: Option<i64>,
    pub status: SubmissionStatus,
    pub reviewed_by: Option<UserId>,
    pub review_note: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitMissionRequest {
    pub mission_id: i64,
    pub content: String,
    pub file_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    Rejected,
}

impl ReviewDecision {
    pub fn status(&self) -> SubmissionStatus {
        match self {
            ReviewDecision::Approved => SubmissionStatus::Approved,
            ReviewDecision::Rejected => SubmissionStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewSubmissionRequest {
    pub decision: ReviewDecision,
    pub score: Option<i64>,
    pub note: Option<String>,
}

// ===== External sources =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExternalSource {
    pub id: i64,
    pub name: String,
    pub endpoint: String,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExternalPointLog {
    pub id: i64,
    pub wallet_id: WalletId,
    pub source_id: i64,
    pub external_transaction_id: String,
    pub amount: i64,
    pub metadata: Option<String>,
    pub status: EntryStatus,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncRequest {
    pub source_id: i64,
    pub external_transaction_id: String,
    pub amount: i64,
    pub metadata: Option<serde_json::Value>,
}

// ===== Peer transfers =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transfer {
    pub id: i64,
    pub sender_wallet_id: WalletId,
    pub receiver_wallet_id: WalletId,
    pub amount: i64,
    pub description: String,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferRequest {
    pub receiver_wallet_id: WalletId,
    pub amount: i64,
    pub description: String,
}

// ===== Admin adjustments =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustmentRequest {
    pub wallet_id: WalletId,
    pub amount: i64,
    pub direction: Direction,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetWalletRequest {
    pub wallet_id: WalletId,
    pub new_balance: i64,
    pub reason: String,
}

// ===== Audit =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    AdjustPoints,
    ResetWallet,
    ReviewSubmission,
    ExternalSync,
    ConsumeToken,
}

impl_text_enum!(AuditAction {
    AdjustPoints => "ADJUST_POINTS",
    ResetWallet => "RESET_WALLET",
    ReviewSubmission => "REVIEW_SUBMISSION",
    ExternalSync => "EXTERNAL_SYNC",
    ConsumeToken => "CONSUME_TOKEN",
});

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ActivityRecord {
    pub actor_id: UserId,
    pub action: AuditAction,
    pub entity: String,
    pub entity_id: i64,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

/// Validates that a point amount is strictly positive.
pub(crate) fn ensure_positive(amount: i64, what: &str) -> Result<(), WalletEngineError> {
    if amount <= 0 {
        return Err(WalletEngineError::Validation(format!(
            "{} must be greater than zero, got {}",
            what, amount
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_enum_round_trip() {
        assert_eq!(EntryType::MarketplaceSale.as_str(), "marketplace_sale");
        assert_eq!("transfer_in".parse::<EntryType>().unwrap(), EntryType::TransferIn);
        assert_eq!(AuditAction::ResetWallet.to_string(), "RESET_WALLET");
        assert!("refund".parse::<EntryType>().is_err());
    }

    #[test]
    fn test_serde_matches_column_text() {
        let json = serde_json::to_string(&EntryType::TransferOut).unwrap();
        assert_eq!(json, "\"transfer_out\"");
        let json = serde_json::to_string(&AuditAction::AdjustPoints).unwrap();
        assert_eq!(json, "\"ADJUST_POINTS\"");
    }

    #[test]
    fn test_actor_role_check() {
        let dosen = Actor::new(3, UserRole::Dosen);
        assert!(dosen
            .require_role(&[UserRole::Dosen, UserRole::Admin], "review submissions")
            .is_ok());

        let student = Actor::new(4, UserRole::Mahasiswa);
        let err = student
            .require_role(&[UserRole::Admin], "adjust points")
            .unwrap_err();
        assert_eq!(err.error_type(), "unauthorized");
    }

    #[test]
    fn test_posting_builder() {
        let posting = Posting::new(EntryType::Mission, "Reward")
            .with_reference(9)
            .by(Originator::Dosen);
        let entry = posting.into_entry(1, 50, Direction::Credit, Utc::now());
        assert_eq!(entry.reference_id, Some(9));
        assert_eq!(entry.created_by, Originator::Dosen);
        assert_eq!(entry.status, EntryStatus::Success);
    }

    #[test]
    fn test_ensure_positive() {
        assert!(ensure_positive(1, "amount").is_ok());
        assert!(ensure_positive(0, "amount").is_err());
        assert!(ensure_positive(-5, "amount").is_err());
    }
}
