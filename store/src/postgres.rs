//! PostgreSQL store backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use fxquote_common::{
    now, quantize_rate, Currency, CurrencyCode, CurrencyPair, Quote, QuoteId, Rate, RateUpdate,
    Transaction, TransactionId,
};

use crate::error::{StoreError, StoreResult};
use crate::repository::Store;

/// Store backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect a pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!(max_connections, "Connected to database");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }
}

fn code_column(row: &PgRow, column: &str) -> StoreResult<CurrencyCode> {
    let raw: String = row.try_get(column)?;
    CurrencyCode::parse(&raw)
        .map_err(|e| StoreError::Database(format!("bad currency code in {}: {}", column, e)))
}

fn currency_from_row(row: &PgRow) -> StoreResult<Currency> {
    let decimal_places: i16 = row.try_get("decimal_places")?;
    Ok(Currency {
        code: code_column(row, "code")?,
        name: row.try_get("name")?,
        decimal_places: u32::try_from(decimal_places).map_err(|_| {
            StoreError::Database(format!("negative decimal places: {}", decimal_places))
        })?,
        enabled: row.try_get("enabled")?,
    })
}

fn rate_from_row(row: &PgRow) -> StoreResult<Rate> {
    Ok(Rate::new(
        CurrencyPair::new(
            code_column(row, "base_code")?,
            code_column(row, "target_code")?,
        ),
        row.try_get("rate")?,
        row.try_get("observed_at")?,
        row.try_get("updated_at")?,
    ))
}

fn quote_from_row(row: &PgRow) -> StoreResult<Quote> {
    let id: Uuid = row.try_get("id")?;
    Ok(Quote {
        id: QuoteId::from_uuid(id),
        from_currency: code_column(row, "from_currency")?,
        to_currency: code_column(row, "to_currency")?,
        amount: row.try_get("amount")?,
        converted_amount: row.try_get("converted_amount")?,
        rate: row.try_get("rate")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> StoreResult<Transaction> {
    let id: Uuid = row.try_get("id")?;
    let quote_id: Uuid = row.try_get("quote_id")?;
    Ok(Transaction {
        id: TransactionId::from_uuid(id),
        quote_id: QuoteId::from_uuid(quote_id),
        amount: row.try_get("amount")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_currency(&self, currency: &Currency) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO currencies (code, name, decimal_places, enabled)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (code)
            DO UPDATE SET name = $2, decimal_places = $3, enabled = $4
            "#,
        )
        .bind(currency.code.as_str())
        .bind(&currency.name)
        .bind(currency.decimal_places as i16)
        .bind(currency.enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_currency(&self, code: &CurrencyCode) -> StoreResult<Option<Currency>> {
        let row = sqlx::query(
            r#"
            SELECT code, name, decimal_places, enabled
            FROM currencies
            WHERE code = $1
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(currency_from_row).transpose()
    }

    async fn enabled_currencies(&self) -> StoreResult<Vec<Currency>> {
        let rows = sqlx::query(
            r#"
            SELECT code, name, decimal_places, enabled
            FROM currencies
            WHERE enabled
            ORDER BY code ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(currency_from_row).collect()
    }

    async fn latest_rate(&self, pair: &CurrencyPair) -> StoreResult<Option<Rate>> {
        let row = sqlx::query(
            r#"
            SELECT base_code, target_code, rate, observed_at, updated_at
            FROM rates
            WHERE base_code = $1 AND target_code = $2
            ORDER BY updated_at DESC, observed_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(pair.base.as_str())
        .bind(pair.target.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(rate_from_row).transpose()
    }

    async fn insert_rate(&self, rate: &Rate) -> StoreResult<Rate> {
        let row = sqlx::query(
            r#"
            INSERT INTO rates (base_code, target_code, rate, observed_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING base_code, target_code, rate, observed_at, updated_at
            "#,
        )
        .bind(rate.pair.base.as_str())
        .bind(rate.pair.target.as_str())
        .bind(quantize_rate(rate.rate))
        .bind(rate.observed_at)
        .bind(rate.updated_at)
        .fetch_one(&self.pool)
        .await?;

        rate_from_row(&row)
    }

    #[instrument(skip(self, updates), fields(base = %base, count = updates.len()))]
    async fn upsert_rates(
        &self,
        base: &CurrencyCode,
        updates: &[RateUpdate],
    ) -> StoreResult<Vec<Rate>> {
        let updated_at: DateTime<Utc> = now();
        let mut tx = self.pool.begin().await?;
        let mut written = Vec::with_capacity(updates.len());

        // Serializes concurrent batches for the same base until commit, so the
        // update-else-insert below never inserts a second current row.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("rates:{}", base.as_str()))
            .execute(&mut *tx)
            .await?;

        for update in updates {
            let rate: Decimal = quantize_rate(update.rate);

            let updated = sqlx::query(
                r#"
                UPDATE rates
                SET rate = $3, observed_at = $4, updated_at = $5
                WHERE id = (
                    SELECT id FROM rates
                    WHERE base_code = $1 AND target_code = $2
                    ORDER BY updated_at DESC, observed_at DESC, id DESC
                    LIMIT 1
                )
                RETURNING base_code, target_code, rate, observed_at, updated_at
                "#,
            )
            .bind(base.as_str())
            .bind(update.target.as_str())
            .bind(rate)
            .bind(update.observed_at)
            .bind(updated_at)
            .fetch_optional(&mut *tx)
            .await?;

            let row = match updated {
                Some(row) => row,
                None => {
                    sqlx::query(
                        r#"
                        INSERT INTO rates (base_code, target_code, rate, observed_at, updated_at)
                        VALUES ($1, $2, $3, $4, $5)
                        RETURNING base_code, target_code, rate, observed_at, updated_at
                        "#,
                    )
                    .bind(base.as_str())
                    .bind(update.target.as_str())
                    .bind(rate)
                    .bind(update.observed_at)
                    .bind(updated_at)
                    .fetch_one(&mut *tx)
                    .await?
                }
            };

            written.push(rate_from_row(&row)?);
        }

        tx.commit().await?;
        debug!(count = written.len(), "Upserted rates");
        Ok(written)
    }

    async fn insert_quote(&self, quote: &Quote) -> StoreResult<Quote> {
        let row = sqlx::query(
            r#"
            INSERT INTO quotes
                (id, from_currency, to_currency, amount, converted_amount, rate, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, from_currency, to_currency, amount, converted_amount, rate, created_at, expires_at
            "#,
        )
        .bind(*quote.id.as_uuid())
        .bind(quote.from_currency.as_str())
        .bind(quote.to_currency.as_str())
        .bind(quote.amount)
        .bind(quote.converted_amount)
        .bind(quote.rate)
        .bind(quote.created_at)
        .bind(quote.expires_at)
        .fetch_one(&self.pool)
        .await?;

        quote_from_row(&row)
    }

    async fn get_quote(&self, id: QuoteId) -> StoreResult<Option<Quote>> {
        let row = sqlx::query(
            r#"
            SELECT id, from_currency, to_currency, amount, converted_amount, rate, created_at, expires_at
            FROM quotes
            WHERE id = $1
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(quote_from_row).transpose()
    }

    async fn transaction_exists(&self, quote_id: QuoteId, amount: Decimal) -> StoreResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM transactions WHERE quote_id = $1 AND amount = $2
            ) AS found
            "#,
        )
        .bind(*quote_id.as_uuid())
        .bind(amount)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("found")?)
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> StoreResult<Transaction> {
        let row = sqlx::query(
            r#"
            INSERT INTO transactions (id, quote_id, amount, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, quote_id, amount, created_at, updated_at
            "#,
        )
        .bind(*transaction.id.as_uuid())
        .bind(*transaction.quote_id.as_uuid())
        .bind(transaction.amount)
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .fetch_one(&self.pool)
        .await?;

        transaction_from_row(&row)
    }

    async fn transactions_for_quote(&self, quote_id: QuoteId) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, quote_id, amount, created_at, updated_at
            FROM transactions
            WHERE quote_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(*quote_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed");
    }
}
