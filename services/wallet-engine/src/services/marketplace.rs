use crate::catalog::product_in;
use crate::clock::Clock;
use crate::database::{LedgerStore, UnitOfWork};
use crate::errors::{Result, WalletEngineError};
use crate::models::{
    Actor, EntryStatus, EntryType, LedgerEntry, PaymentMethod, Posting, Product, PurchaseRecord,
    PurchaseRequest, RecordStatus, UserRole, Wallet,
};
use crate::mutator::BalanceMutator;
use crate::payment_tokens::{PaymentTokenEngine, TokenExpectation};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseReceipt {
    pub record: PurchaseRecord,
    pub buyer_entry: LedgerEntry,
    pub seller_entry: LedgerEntry,
}

pub struct MarketplaceService {
    store: Arc<LedgerStore>,
    mutator: Arc<BalanceMutator>,
    tokens: Arc<PaymentTokenEngine>,
    clock: Arc<dyn Clock>,
}

impl MarketplaceService {
    pub fn new(
        store: Arc<LedgerStore>,
        mutator: Arc<BalanceMutator>,
        tokens: Arc<PaymentTokenEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            mutator,
            tokens,
            clock,
        }
    }

    /// Buys `quantity` units of a product, paying from the buyer's wallet or
    /// with a QR payment token. Stock, payment and the purchase record commit
    /// together or not at all.
    pub async fn purchase(&self, actor: &Actor, request: PurchaseRequest) -> Result<PurchaseReceipt> {
        let quantity = request.quantity.unwrap_or(1);
        if quantity <= 0 {
            return Err(WalletEngineError::Validation(format!(
                "quantity must be at least 1, got {}",
                quantity
            )));
        }
        if request.buyer_name.trim().is_empty() {
            return Err(WalletEngineError::Validation(
                "buyer name is required".to_string(),
            ));
        }

        let buyer = self
            .store
            .wallet_for_user(actor.user_id)
            .await?
            .ok_or_else(|| WalletEngineError::not_found("wallet for user", actor.user_id))?;

        let mut uow = self.store.begin().await?;
        let product = self
            .reserve_stock(&mut uow, request.product_id, quantity)
            .await?;
        let total = product.price.checked_mul(quantity).ok_or_else(|| {
            WalletEngineError::Validation(format!(
                "total for {} x {} overflows",
                quantity, product.price
            ))
        })?;

        let seller = self.seller_wallet(&mut uow, &product).await?;
        if seller.id == buyer.id {
            return Err(WalletEngineError::Validation(
                "sellers cannot buy their own products".to_string(),
            ));
        }

        let (payment_method, buyer_entry, seller_entry) = match request.payment_token.as_deref() {
            Some(token) => {
                let expect = TokenExpectation {
                    payer_wallet_id: Some(buyer.id),
                    amount: Some(total),
                };
                let settlement = self
                    .tokens
                    .consume_in(&mut uow, token, seller.id, expect)
                    .await?;
                (
                    PaymentMethod::Qr,
                    settlement.payer_entry,
                    settlement.consumer_entry,
                )
            }
            None => {
                let debit = Posting::new(
                    EntryType::Marketplace,
                    format!("Buy {}x {}", quantity, product.name),
                )
                .with_reference(product.id);
                let credit = Posting::new(
                    EntryType::MarketplaceSale,
                    format!("Sale {}x {} to {}", quantity, product.name, request.buyer_name),
                )
                .with_reference(product.id);

                let buyer_entry = self.mutator.debit(&mut uow, buyer.id, total, debit).await?;
                let seller_entry = self
                    .mutator
                    .credit(&mut uow, seller.id, total, credit)
                    .await?;
                (PaymentMethod::Wallet, buyer_entry, seller_entry)
            }
        };

        let record = sqlx::query_as::<_, PurchaseRecord>(
            r#"
            INSERT INTO marketplace_transactions
                (wallet_id, product_id, amount, total_amount, quantity, buyer_name, buyer_npm,
                 buyer_major, buyer_batch, payment_method, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(buyer.id)
        .bind(product.id)
        .bind(product.price)
        .bind(total)
        .bind(quantity)
        .bind(&request.buyer_name)
        .bind(&request.buyer_npm)
        .bind(&request.buyer_major)
        .bind(&request.buyer_batch)
        .bind(payment_method)
        .bind(EntryStatus::Success)
        .bind(self.clock.now())
        .fetch_one(uow.conn())
        .await?;

        uow.commit().await?;
        info!(
            "Wallet {} bought {}x product {} for {} points via {}",
            buyer.id, quantity, product.id, total, payment_method
        );

        Ok(PurchaseReceipt {
            record,
            buyer_entry,
            seller_entry,
        })
    }

    pub async fn purchases_for_wallet(&self, wallet_id: i64) -> Result<Vec<PurchaseRecord>> {
        let records = sqlx::query_as::<_, PurchaseRecord>(
            "SELECT * FROM marketplace_transactions WHERE wallet_id = $1 ORDER BY id DESC",
        )
        .bind(wallet_id)
        .fetch_all(self.store.pool())
        .await?;

        Ok(records)
    }

    /// Decrements stock with a conditional update, then explains a miss.
    async fn reserve_stock(
        &self,
        uow: &mut UnitOfWork,
        product_id: i64,
        quantity: i64,
    ) -> Result<Product> {
        let reserved = sqlx::query_as::<_, Product>(
            r#"
            UPDATE products
            SET stock = stock - $1, updated_at = $2
            WHERE id = $3 AND status = $4 AND stock >= $1
            RETURNING *
            "#,
        )
        .bind(quantity)
        .bind(self.clock.now())
        .bind(product_id)
        .bind(RecordStatus::Active)
        .fetch_optional(uow.conn())
        .await?;

        if let Some(product) = reserved {
            return Ok(product);
        }

        let product = product_in(uow, product_id).await?;
        let err = if product.status != RecordStatus::Active {
            WalletEngineError::InvalidState(format!("product {} is not available", product.id))
        } else {
            WalletEngineError::InsufficientStock {
                product_id: product.id,
                requested: quantity,
                available: product.stock,
            }
        };
        warn!("Purchase rejected: {}", err);
        Err(err)
    }

    /// The product creator's wallet, falling back to the first admin's.
    async fn seller_wallet(&self, uow: &mut UnitOfWork, product: &Product) -> Result<Wallet> {
        if let Some(wallet) = self.store.wallet_for_user_in(uow, product.created_by).await? {
            return Ok(wallet);
        }

        let fallback = sqlx::query_as::<_, Wallet>(
            r#"
            SELECT w.* FROM wallets w
            JOIN users u ON u.id = w.user_id
            WHERE u.role = $1
            ORDER BY u.id ASC
            LIMIT 1
            "#,
        )
        .bind(UserRole::Admin)
        .fetch_optional(uow.conn())
        .await?;

        fallback.ok_or_else(|| WalletEngineError::not_found("seller wallet for product", product.id))
    }
}
