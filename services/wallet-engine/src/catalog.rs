//! Users, products and missions: the records that feed balance mutations.
//!
//! Only the calls the orchestrators and tests need live here; full CRUD is
//! owned by the admin surface.

use crate::clock::Clock;
use crate::database::{LedgerStore, UnitOfWork};
use crate::errors::{Result, WalletEngineError};
use crate::models::{
    ensure_positive, Actor, Mission, MissionStatus, MissionSubmission, NewMission, NewProduct,
    NewUser, Product, RecordStatus, User, UserId, UserRole, Wallet,
};
use std::sync::Arc;
use tracing::info;

pub struct Catalog {
    store: Arc<LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl Catalog {
    pub fn new(store: Arc<LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Creates a user together with an empty wallet.
    pub async fn open_account(&self, new_user: NewUser) -> Result<(User, Wallet)> {
        if new_user.email.trim().is_empty() || new_user.full_name.trim().is_empty() {
            return Err(WalletEngineError::Validation(
                "email and full name are required".to_string(),
            ));
        }

        let mut uow = self.store.begin().await?;
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, full_name, nim_nip, role, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(new_user.email.trim())
        .bind(new_user.full_name.trim())
        .bind(&new_user.nim_nip)
        .bind(new_user.role)
        .bind(RecordStatus::Active)
        .bind(self.clock.now())
        .fetch_one(uow.conn())
        .await
        .map_err(|e| {
            WalletEngineError::on_unique_violation(e, || {
                WalletEngineError::DuplicateOperation(format!(
                    "email {} is already registered",
                    new_user.email
                ))
            })
        })?;

        let wallet = self.store.create_wallet(&mut uow, user.id, self.clock.now()).await?;
        uow.commit().await?;

        info!(
            "Opened {} account {} with wallet {}",
            user.role, user.id, wallet.id
        );
        Ok((user, wallet))
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(self.store.pool())
            .await?;

        Ok(user)
    }

    pub async fn set_user_status(&self, user_id: UserId, status: RecordStatus) -> Result<()> {
        let result = sqlx::query("UPDATE users SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(user_id)
            .execute(self.store.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(WalletEngineError::not_found("user", user_id));
        }
        Ok(())
    }

    pub async fn create_product(&self, actor: &Actor, product: NewProduct) -> Result<Product> {
        actor.require_role(&[UserRole::Admin, UserRole::Merchant], "list products")?;
        ensure_positive(product.price, "price")?;
        if product.stock < 0 {
            return Err(WalletEngineError::Validation(
                "stock cannot be negative".to_string(),
            ));
        }

        let now = self.clock.now();
        let created = sqlx::query_as::<_, Product>(
            r#"
            INSERT INTO products (name, description, price, stock, status, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING *
            "#,
        )
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price)
        .bind(product.stock)
        .bind(RecordStatus::Active)
        .bind(actor.user_id)
        .bind(now)
        .fetch_one(self.store.pool())
        .await?;

        Ok(created)
    }

    pub async fn get_product(&self, product_id: i64) -> Result<Option<Product>> {
        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(self.store.pool())
            .await?;

        Ok(product)
    }

    pub async fn set_product_status(&self, product_id: i64, status: RecordStatus) -> Result<Product> {
        sqlx::query_as::<_, Product>(
            "UPDATE products SET status = $1, updated_at = $2 WHERE id = $3 RETURNING *",
        )
        .bind(status)
        .bind(self.clock.now())
        .bind(product_id)
        .fetch_optional(self.store.pool())
        .await?
        .ok_or_else(|| WalletEngineError::not_found("product", product_id))
    }

    pub async fn create_mission(&self, actor: &Actor, mission: NewMission) -> Result<Mission> {
        actor.require_role(&[UserRole::Dosen, UserRole::Admin], "create missions")?;
        ensure_positive(mission.points, "mission points")?;
        if mission.title.trim().is_empty() {
            return Err(WalletEngineError::Validation(
                "mission title is required".to_string(),
            ));
        }

        let created = sqlx::query_as::<_, Mission>(
            r#"
            INSERT INTO missions (creator_id, title, description, mission_type, points, deadline, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(actor.user_id)
        .bind(mission.title.trim())
        .bind(&mission.description)
        .bind(mission.mission_type)
        .bind(mission.points)
        .bind(mission.deadline)
        .bind(MissionStatus::Active)
        .bind(self.clock.now())
        .fetch_one(self.store.pool())
        .await?;

        Ok(created)
    }

    pub async fn get_mission(&self, mission_id: i64) -> Result<Option<Mission>> {
        let mission = sqlx::query_as::<_, Mission>("SELECT * FROM missions WHERE id = $1")
            .bind(mission_id)
            .fetch_optional(self.store.pool())
            .await?;

        Ok(mission)
    }

    pub async fn set_mission_status(&self, mission_id: i64, status: MissionStatus) -> Result<()> {
        let result = sqlx::query("UPDATE missions SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(mission_id)
            .execute(self.store.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(WalletEngineError::not_found("mission", mission_id));
        }
        Ok(())
    }

    pub async fn get_submission(&self, submission_id: i64) -> Result<Option<MissionSubmission>> {
        let submission =
            sqlx::query_as::<_, MissionSubmission>("SELECT * FROM mission_submissions WHERE id = $1")
                .bind(submission_id)
                .fetch_optional(self.store.pool())
                .await?;

        Ok(submission)
    }
}

/// Loads a mission inside an open unit of work.
pub(crate) async fn mission_in(uow: &mut UnitOfWork, mission_id: i64) -> Result<Mission> {
    sqlx::query_as::<_, Mission>("SELECT * FROM missions WHERE id = $1")
        .bind(mission_id)
        .fetch_optional(uow.conn())
        .await?
        .ok_or_else(|| WalletEngineError::not_found("mission", mission_id))
}

/// Loads a product inside an open unit of work.
pub(crate) async fn product_in(uow: &mut UnitOfWork, product_id: i64) -> Result<Product> {
    sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_optional(uow.conn())
        .await?
        .ok_or_else(|| WalletEngineError::not_found("product", product_id))
}
