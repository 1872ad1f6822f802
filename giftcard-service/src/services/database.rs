//! Postgres store for giftcard-service.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction as PgTransaction};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::models::{
    BusinessGiftCard, DefaultMode, GiftCardFilter, GiftCardGuard, GiftCardStatus, PaymentMethod,
    PersonalGiftCard, PersonalGiftCardStatus, RemovalOutcome, SentStatus, SummaryBucket,
    Transaction, TransactionFilter, TransactionPage, Wallet,
};
use crate::services::error::{is_unique_violation, ServiceError};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{
    GiftCardStore, HealthCheck, LedgerEntryWrite, LedgerWrite, PaymentMethodStore,
    PersonalGiftCardStore, StoreResult, WalletStore,
};

const WALLET_COLUMNS: &str = "wallet_id, business_id, owner_id, balance, total_income, \
    total_expenses, pending_balance, currency, status, is_verified, version, created_utc, updated_utc";

const TRANSACTION_COLUMNS: &str = "transaction_id, wallet_id, amount, transaction_type, status, \
    reference_id, description, created_utc, updated_utc";

const PAYMENT_METHOD_COLUMNS: &str = "payment_method_id, wallet_id, method_type, gateway_token, \
    card_brand, card_last_four, card_exp_month, card_exp_year, bank_name, account_holder, \
    account_last_four, is_default, is_active, created_utc, updated_utc";

const GIFT_CARD_COLUMNS: &str = "gift_card_id, business_id, code, amount, remaining_amount, \
    status, sent_status, recipient_name, recipient_email, message, created_by, purchaser_id, \
    sale_reference, sold_utc, expires_at, redeemed_at, created_utc, updated_utc";

const PERSONAL_CARD_COLUMNS: &str = "personal_gift_card_id, sender_id, payment_method_id, \
    recipient_name, recipient_email, message, amount, currency, status, code, payment_reference, \
    expires_at, used_at, redeemed_by, created_utc, updated_utc";

fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> ServiceError {
    move |e| match ServiceError::from(e) {
        ServiceError::Database(msg) => ServiceError::Database(format!("{}: {}", context, msg)),
        ServiceError::Conflict(msg) => ServiceError::Conflict(format!("{}: {}", context, msg)),
        other => other,
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "giftcard-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, ServiceError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(db_error("Failed to connect"))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), ServiceError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ServiceError::Database(format!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn begin(&self) -> StoreResult<PgTransaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))
    }

    /// Row lock on the wallet that serializes default-payment-method changes.
    async fn lock_wallet(
        tx: &mut PgTransaction<'static, Postgres>,
        wallet_id: Uuid,
    ) -> StoreResult<bool> {
        let locked = sqlx::query_scalar::<_, Uuid>(
            "SELECT wallet_id FROM wallets WHERE wallet_id = $1 FOR UPDATE",
        )
        .bind(wallet_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error("Failed to lock wallet"))?;

        Ok(locked.is_some())
    }

    async fn clear_defaults(
        tx: &mut PgTransaction<'static, Postgres>,
        wallet_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE payment_methods
            SET is_default = FALSE, updated_utc = $2
            WHERE wallet_id = $1 AND is_default
            "#,
        )
        .bind(wallet_id)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(db_error("Failed to clear default payment method"))?;

        Ok(())
    }
}

#[async_trait]
impl HealthCheck for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> StoreResult<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error("Health check failed"))?;

        timer.observe_duration();
        Ok(())
    }
}

#[async_trait]
impl WalletStore for Database {
    #[instrument(skip(self, wallet), fields(business_id = %wallet.business_id))]
    async fn insert_wallet(&self, wallet: &Wallet) -> StoreResult<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_wallet"])
            .start_timer();

        sqlx::query(&format!(
            "INSERT INTO wallets ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            WALLET_COLUMNS
        ))
        .bind(wallet.wallet_id)
        .bind(wallet.business_id)
        .bind(wallet.owner_id)
        .bind(wallet.balance)
        .bind(wallet.total_income)
        .bind(wallet.total_expenses)
        .bind(wallet.pending_balance)
        .bind(&wallet.currency)
        .bind(wallet.status.as_str())
        .bind(wallet.is_verified)
        .bind(wallet.version)
        .bind(wallet.created_utc)
        .bind(wallet.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::Conflict(format!(
                    "Wallet already exists for business {}",
                    wallet.business_id
                ))
            } else {
                ServiceError::Database(format!("Failed to create wallet: {}", e))
            }
        })?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_wallet(&self, wallet_id: Uuid) -> StoreResult<Option<Wallet>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_wallet"])
            .start_timer();

        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE wallet_id = $1",
            WALLET_COLUMNS
        ))
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get wallet"))?;

        timer.observe_duration();
        Ok(wallet)
    }

    #[instrument(skip(self))]
    async fn find_wallet_by_business(&self, business_id: Uuid) -> StoreResult<Option<Wallet>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_wallet_by_business"])
            .start_timer();

        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE business_id = $1",
            WALLET_COLUMNS
        ))
        .bind(business_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get wallet by business"))?;

        timer.observe_duration();
        Ok(wallet)
    }

    #[instrument(skip(self, wallet), fields(wallet_id = %wallet.wallet_id))]
    async fn update_wallet(&self, wallet: &Wallet, expected_version: i64) -> StoreResult<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_wallet"])
            .start_timer();

        let result = update_wallet_guarded(&self.pool, wallet, expected_version).await?;

        timer.observe_duration();
        Ok(result)
    }

    #[instrument(skip(self, write), fields(wallet_id = %write.wallet.wallet_id))]
    async fn commit_ledger_write(&self, write: &LedgerWrite) -> StoreResult<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["commit_ledger_write"])
            .start_timer();

        let mut tx = self.begin().await?;

        if !update_wallet_guarded(&mut *tx, &write.wallet, write.expected_version).await? {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(false);
        }

        let entry_written = match &write.entry {
            LedgerEntryWrite::Insert(t) => {
                sqlx::query(&format!(
                    "INSERT INTO transactions ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                    TRANSACTION_COLUMNS
                ))
                .bind(t.transaction_id)
                .bind(t.wallet_id)
                .bind(t.amount)
                .bind(t.transaction_type.as_str())
                .bind(t.status.as_str())
                .bind(&t.reference_id)
                .bind(&t.description)
                .bind(t.created_utc)
                .bind(t.updated_utc)
                .execute(&mut *tx)
                .await
                .map_err(db_error("Failed to insert transaction"))?
                .rows_affected()
                    == 1
            }
            LedgerEntryWrite::Settle { transaction, from } => {
                sqlx::query(
                    r#"
                    UPDATE transactions
                    SET status = $2, reference_id = $3, description = $4, updated_utc = $5
                    WHERE transaction_id = $1 AND status = $6
                    "#,
                )
                .bind(transaction.transaction_id)
                .bind(transaction.status.as_str())
                .bind(&transaction.reference_id)
                .bind(&transaction.description)
                .bind(transaction.updated_utc)
                .bind(from.as_str())
                .execute(&mut *tx)
                .await
                .map_err(db_error("Failed to settle transaction"))?
                .rows_affected()
                    == 1
            }
        };

        if !entry_written {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(false);
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit ledger write"))?;

        timer.observe_duration();
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn find_transaction(&self, transaction_id: Uuid) -> StoreResult<Option<Transaction>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_transaction"])
            .start_timer();

        let transaction = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {} FROM transactions WHERE transaction_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get transaction"))?;

        timer.observe_duration();
        Ok(transaction)
    }

    #[instrument(skip(self, filter))]
    async fn list_transactions(
        &self,
        wallet_id: Uuid,
        filter: &TransactionFilter,
    ) -> StoreResult<TransactionPage> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_transactions"])
            .start_timer();

        const PREDICATE: &str = r#"
            wallet_id = $1
            AND ($2::TEXT IS NULL OR transaction_type = $2)
            AND ($3::TEXT IS NULL OR status = $3)
            AND ($4::TIMESTAMPTZ IS NULL OR created_utc >= $4)
            AND ($5::TIMESTAMPTZ IS NULL OR created_utc <= $5)
        "#;

        let transaction_type = filter.transaction_type.map(|t| t.as_str());
        let status = filter.status.map(|s| s.as_str());

        let total_count = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM transactions WHERE {}",
            PREDICATE
        ))
        .bind(wallet_id)
        .bind(transaction_type)
        .bind(status)
        .bind(filter.created_from)
        .bind(filter.created_to)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to count transactions"))?;

        let transactions = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {} FROM transactions WHERE {} \
             ORDER BY created_utc DESC, transaction_id DESC LIMIT $6 OFFSET $7",
            TRANSACTION_COLUMNS, PREDICATE
        ))
        .bind(wallet_id)
        .bind(transaction_type)
        .bind(status)
        .bind(filter.created_from)
        .bind(filter.created_to)
        .bind(filter.page_size())
        .bind(filter.offset.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list transactions"))?;

        timer.observe_duration();
        Ok(TransactionPage {
            transactions,
            total_count,
        })
    }
}

async fn update_wallet_guarded<'e, E>(
    executor: E,
    wallet: &Wallet,
    expected_version: i64,
) -> StoreResult<bool>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE wallets
        SET balance = $3, total_income = $4, total_expenses = $5, pending_balance = $6,
            status = $7, is_verified = $8, version = $9, updated_utc = $10
        WHERE wallet_id = $1 AND version = $2
        "#,
    )
    .bind(wallet.wallet_id)
    .bind(expected_version)
    .bind(wallet.balance)
    .bind(wallet.total_income)
    .bind(wallet.total_expenses)
    .bind(wallet.pending_balance)
    .bind(wallet.status.as_str())
    .bind(wallet.is_verified)
    .bind(wallet.version)
    .bind(wallet.updated_utc)
    .execute(executor)
    .await
    .map_err(db_error("Failed to update wallet"))?;

    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl PaymentMethodStore for Database {
    #[instrument(skip(self, method), fields(wallet_id = %method.wallet_id))]
    async fn insert_payment_method(
        &self,
        method: &PaymentMethod,
        mode: DefaultMode,
    ) -> StoreResult<PaymentMethod> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_payment_method"])
            .start_timer();

        let mut tx = self.begin().await?;
        if !Self::lock_wallet(&mut tx, method.wallet_id).await? {
            tx.rollback().await.ok();
            return Err(ServiceError::NotFound(format!("Wallet {}", method.wallet_id)));
        }

        let is_default = match mode {
            DefaultMode::Replace => {
                Self::clear_defaults(&mut tx, method.wallet_id, method.updated_utc).await?;
                true
            }
            DefaultMode::IfNone => !sqlx::query_scalar::<_, bool>(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM payment_methods
                    WHERE wallet_id = $1 AND is_default AND is_active
                )
                "#,
            )
            .bind(method.wallet_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error("Failed to check default payment method"))?,
        };

        let stored = sqlx::query_as::<_, PaymentMethod>(&format!(
            "INSERT INTO payment_methods ({cols}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             RETURNING {cols}",
            cols = PAYMENT_METHOD_COLUMNS
        ))
        .bind(method.payment_method_id)
        .bind(method.wallet_id)
        .bind(method.method_type.as_str())
        .bind(&method.gateway_token)
        .bind(&method.card_brand)
        .bind(&method.card_last_four)
        .bind(method.card_exp_month)
        .bind(method.card_exp_year)
        .bind(&method.bank_name)
        .bind(&method.account_holder)
        .bind(&method.account_last_four)
        .bind(is_default)
        .bind(method.is_active)
        .bind(method.created_utc)
        .bind(method.updated_utc)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("Failed to insert payment method"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit payment method"))?;

        timer.observe_duration();
        Ok(stored)
    }

    #[instrument(skip(self))]
    async fn find_payment_method(
        &self,
        payment_method_id: Uuid,
    ) -> StoreResult<Option<PaymentMethod>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_payment_method"])
            .start_timer();

        let method = sqlx::query_as::<_, PaymentMethod>(&format!(
            "SELECT {} FROM payment_methods WHERE payment_method_id = $1",
            PAYMENT_METHOD_COLUMNS
        ))
        .bind(payment_method_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get payment method"))?;

        timer.observe_duration();
        Ok(method)
    }

    #[instrument(skip(self))]
    async fn list_payment_methods(&self, wallet_id: Uuid) -> StoreResult<Vec<PaymentMethod>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payment_methods"])
            .start_timer();

        let methods = sqlx::query_as::<_, PaymentMethod>(&format!(
            "SELECT {} FROM payment_methods WHERE wallet_id = $1 AND is_active \
             ORDER BY created_utc DESC",
            PAYMENT_METHOD_COLUMNS
        ))
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list payment methods"))?;

        timer.observe_duration();
        Ok(methods)
    }

    #[instrument(skip(self))]
    async fn set_default_payment_method(
        &self,
        wallet_id: Uuid,
        payment_method_id: Uuid,
    ) -> StoreResult<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_default_payment_method"])
            .start_timer();

        let mut tx = self.begin().await?;
        if !Self::lock_wallet(&mut tx, wallet_id).await? {
            tx.rollback().await.ok();
            return Ok(false);
        }

        let now = Utc::now();
        Self::clear_defaults(&mut tx, wallet_id, now).await?;

        let updated = sqlx::query(
            r#"
            UPDATE payment_methods
            SET is_default = TRUE, updated_utc = $3
            WHERE payment_method_id = $1 AND wallet_id = $2 AND is_active
            "#,
        )
        .bind(payment_method_id)
        .bind(wallet_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to set default payment method"))?
        .rows_affected();

        if updated != 1 {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(false);
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit default payment method"))?;

        timer.observe_duration();
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn remove_payment_method(
        &self,
        wallet_id: Uuid,
        payment_method_id: Uuid,
    ) -> StoreResult<RemovalOutcome> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["remove_payment_method"])
            .start_timer();

        let mut tx = self.begin().await?;
        if !Self::lock_wallet(&mut tx, wallet_id).await? {
            tx.rollback().await.ok();
            return Ok(RemovalOutcome::NotFound);
        }

        let now = Utc::now();
        let before = sqlx::query_as::<_, PaymentMethod>(&format!(
            "SELECT {} FROM payment_methods \
             WHERE payment_method_id = $1 AND wallet_id = $2 AND is_active",
            PAYMENT_METHOD_COLUMNS
        ))
        .bind(payment_method_id)
        .bind(wallet_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to get payment method"))?;

        let Some(before) = before else {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(RemovalOutcome::NotFound);
        };

        let removed = sqlx::query_as::<_, PaymentMethod>(&format!(
            "UPDATE payment_methods SET is_active = FALSE, is_default = FALSE, updated_utc = $2 \
             WHERE payment_method_id = $1 RETURNING {}",
            PAYMENT_METHOD_COLUMNS
        ))
        .bind(payment_method_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("Failed to remove payment method"))?;

        let promoted = if before.is_default {
            sqlx::query_as::<_, PaymentMethod>(&format!(
                r#"
                UPDATE payment_methods SET is_default = TRUE, updated_utc = $2
                WHERE payment_method_id = (
                    SELECT payment_method_id FROM payment_methods
                    WHERE wallet_id = $1 AND is_active
                    ORDER BY created_utc DESC
                    LIMIT 1
                )
                RETURNING {}
                "#,
                PAYMENT_METHOD_COLUMNS
            ))
            .bind(wallet_id)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error("Failed to promote payment method"))?
        } else {
            None
        };

        tx.commit()
            .await
            .map_err(db_error("Failed to commit payment method removal"))?;

        timer.observe_duration();
        Ok(RemovalOutcome::Removed { removed, promoted })
    }
}

#[async_trait]
impl GiftCardStore for Database {
    #[instrument(skip(self, card), fields(gift_card_id = %card.gift_card_id))]
    async fn insert_gift_card(&self, card: &BusinessGiftCard) -> StoreResult<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_gift_card"])
            .start_timer();

        sqlx::query(&format!(
            "INSERT INTO business_gift_cards ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
            GIFT_CARD_COLUMNS
        ))
        .bind(card.gift_card_id)
        .bind(card.business_id)
        .bind(&card.code)
        .bind(card.amount)
        .bind(card.remaining_amount)
        .bind(card.status.as_str())
        .bind(card.sent_status.as_str())
        .bind(&card.recipient_name)
        .bind(&card.recipient_email)
        .bind(&card.message)
        .bind(card.created_by)
        .bind(card.purchaser_id)
        .bind(&card.sale_reference)
        .bind(card.sold_utc)
        .bind(card.expires_at)
        .bind(card.redeemed_at)
        .bind(card.created_utc)
        .bind(card.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::Conflict(format!("Gift card code '{}' already exists", card.code))
            } else {
                ServiceError::Database(format!("Failed to create gift card: {}", e))
            }
        })?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_gift_card(&self, gift_card_id: Uuid) -> StoreResult<Option<BusinessGiftCard>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_gift_card"])
            .start_timer();

        let card = sqlx::query_as::<_, BusinessGiftCard>(&format!(
            "SELECT {} FROM live_business_gift_cards WHERE gift_card_id = $1",
            GIFT_CARD_COLUMNS
        ))
        .bind(gift_card_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get gift card"))?;

        timer.observe_duration();
        Ok(card)
    }

    #[instrument(skip(self, code))]
    async fn find_gift_card_by_code(&self, code: &str) -> StoreResult<Option<BusinessGiftCard>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_gift_card_by_code"])
            .start_timer();

        let card = sqlx::query_as::<_, BusinessGiftCard>(&format!(
            "SELECT {} FROM live_business_gift_cards WHERE code = $1",
            GIFT_CARD_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get gift card by code"))?;

        timer.observe_duration();
        Ok(card)
    }

    #[instrument(skip(self, filter))]
    async fn list_gift_cards(
        &self,
        business_id: Uuid,
        filter: &GiftCardFilter,
    ) -> StoreResult<Vec<BusinessGiftCard>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_gift_cards"])
            .start_timer();

        let cards = sqlx::query_as::<_, BusinessGiftCard>(&format!(
            r#"
            SELECT {} FROM live_business_gift_cards
            WHERE business_id = $1
              AND ($2::TEXT IS NULL OR status = $2)
              AND ($3::TEXT IS NULL OR sent_status = $3)
            ORDER BY created_utc DESC
            LIMIT $4 OFFSET $5
            "#,
            GIFT_CARD_COLUMNS
        ))
        .bind(business_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.sent_status.map(|s| s.as_str()))
        .bind(filter.page_size())
        .bind(filter.offset.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list gift cards"))?;

        timer.observe_duration();
        Ok(cards)
    }

    #[instrument(skip(self, card, expected), fields(gift_card_id = %card.gift_card_id))]
    async fn update_gift_card(
        &self,
        card: &BusinessGiftCard,
        expected: &GiftCardGuard,
    ) -> StoreResult<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_gift_card"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE business_gift_cards
            SET status = $2, sent_status = $3, remaining_amount = $4, purchaser_id = $5,
                sale_reference = $6, sold_utc = $7, redeemed_at = $8, updated_utc = $9
            WHERE gift_card_id = $1
              AND status <> 'deleted'
              AND status = $10
              AND sent_status = $11
              AND remaining_amount = $12
              AND sold_utc IS NOT DISTINCT FROM $13
            "#,
        )
        .bind(card.gift_card_id)
        .bind(card.status.as_str())
        .bind(card.sent_status.as_str())
        .bind(card.remaining_amount)
        .bind(card.purchaser_id)
        .bind(&card.sale_reference)
        .bind(card.sold_utc)
        .bind(card.redeemed_at)
        .bind(card.updated_utc)
        .bind(expected.status.as_str())
        .bind(expected.sent_status.as_str())
        .bind(expected.remaining_amount)
        .bind(expected.sold_utc)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to update gift card"))?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn expire_gift_cards(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["expire_gift_cards"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE business_gift_cards
            SET status = 'expired', updated_utc = $1
            WHERE status = 'available' AND expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to expire gift cards"))?;

        timer.observe_duration();
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn gift_card_summary(&self, business_id: Uuid) -> StoreResult<Vec<SummaryBucket>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["gift_card_summary"])
            .start_timer();

        let rows = sqlx::query_as::<_, (String, String, i64, Decimal, Decimal)>(
            r#"
            SELECT status, sent_status, COUNT(*),
                   COALESCE(SUM(amount), 0), COALESCE(SUM(remaining_amount), 0)
            FROM live_business_gift_cards
            WHERE business_id = $1
            GROUP BY status, sent_status
            "#,
        )
        .bind(business_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to summarize gift cards"))?;

        timer.observe_duration();

        rows.into_iter()
            .map(|(status, sent_status, card_count, face_value, remaining_value)| {
                let status = status
                    .parse::<GiftCardStatus>()
                    .map_err(|e| ServiceError::Internal(e.to_string()))?;
                let sent_status = sent_status
                    .parse::<SentStatus>()
                    .map_err(|e| ServiceError::Internal(e.to_string()))?;
                Ok(SummaryBucket {
                    status,
                    sent_status,
                    card_count,
                    face_value,
                    remaining_value,
                })
            })
            .collect()
    }
}

#[async_trait]
impl PersonalGiftCardStore for Database {
    #[instrument(skip(self, card), fields(card_id = %card.personal_gift_card_id))]
    async fn insert_personal_card(&self, card: &PersonalGiftCard) -> StoreResult<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_personal_card"])
            .start_timer();

        sqlx::query(&format!(
            "INSERT INTO personal_gift_cards ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
            PERSONAL_CARD_COLUMNS
        ))
        .bind(card.personal_gift_card_id)
        .bind(card.sender_id)
        .bind(card.payment_method_id)
        .bind(&card.recipient_name)
        .bind(&card.recipient_email)
        .bind(&card.message)
        .bind(card.amount)
        .bind(&card.currency)
        .bind(card.status.as_str())
        .bind(&card.code)
        .bind(&card.payment_reference)
        .bind(card.expires_at)
        .bind(card.used_at)
        .bind(card.redeemed_by)
        .bind(card.created_utc)
        .bind(card.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                warn!("Personal gift card code collision");
                ServiceError::Conflict("Personal gift card code already exists".to_string())
            } else {
                ServiceError::Database(format!("Failed to create personal gift card: {}", e))
            }
        })?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_personal_card(&self, card_id: Uuid) -> StoreResult<Option<PersonalGiftCard>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_personal_card"])
            .start_timer();

        let card = sqlx::query_as::<_, PersonalGiftCard>(&format!(
            "SELECT {} FROM personal_gift_cards WHERE personal_gift_card_id = $1",
            PERSONAL_CARD_COLUMNS
        ))
        .bind(card_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get personal gift card"))?;

        timer.observe_duration();
        Ok(card)
    }

    #[instrument(skip(self, code))]
    async fn find_personal_card_by_code(
        &self,
        code: &str,
    ) -> StoreResult<Option<PersonalGiftCard>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_personal_card_by_code"])
            .start_timer();

        let card = sqlx::query_as::<_, PersonalGiftCard>(&format!(
            "SELECT {} FROM personal_gift_cards WHERE code = $1",
            PERSONAL_CARD_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get personal gift card by code"))?;

        timer.observe_duration();
        Ok(card)
    }

    #[instrument(skip(self))]
    async fn list_personal_cards_by_sender(
        &self,
        sender_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<PersonalGiftCard>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_personal_cards_by_sender"])
            .start_timer();

        let cards = sqlx::query_as::<_, PersonalGiftCard>(&format!(
            "SELECT {} FROM personal_gift_cards WHERE sender_id = $1 \
             ORDER BY created_utc DESC LIMIT $2 OFFSET $3",
            PERSONAL_CARD_COLUMNS
        ))
        .bind(sender_id)
        .bind(limit.clamp(1, 100))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list personal gift cards"))?;

        timer.observe_duration();
        Ok(cards)
    }

    #[instrument(skip(self, card), fields(card_id = %card.personal_gift_card_id))]
    async fn update_personal_card(
        &self,
        card: &PersonalGiftCard,
        expected: PersonalGiftCardStatus,
    ) -> StoreResult<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_personal_card"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE personal_gift_cards
            SET status = $2, payment_reference = $3, used_at = $4, redeemed_by = $5, updated_utc = $6
            WHERE personal_gift_card_id = $1 AND status = $7
            "#,
        )
        .bind(card.personal_gift_card_id)
        .bind(card.status.as_str())
        .bind(&card.payment_reference)
        .bind(card.used_at)
        .bind(card.redeemed_by)
        .bind(card.updated_utc)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to update personal gift card"))?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn expire_personal_cards(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["expire_personal_cards"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE personal_gift_cards
            SET status = 'expired', updated_utc = $1
            WHERE status = 'active' AND expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to expire personal gift cards"))?;

        timer.observe_duration();
        Ok(result.rows_affected())
    }
}
