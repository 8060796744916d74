use crate::accounts::select_or_insert_account_id;
use crate::assets::{
    canonical_asset_order, select_asset_id, select_or_insert_asset_id, AssetDescriptor,
    AssetPairQuery,
};
use crate::error::QueryError;
use crate::paging::{Continuation, PageQuery, QueryOrder, TradeCursor};
use crate::utilities::amount_to_decimal;
use crate::veta::Veta;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;

// One executed match between two offers, joined to the asset and account
// registries. Rows are written once at ingestion in canonical pair order and never
// updated; a query for the mirrored pair direction reads the same rows through the
// reverse select list.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Trade {
    pub operation_id: i64,
    pub trade_order: i32,
    pub closed_at: DateTime<Utc>,
    pub offer_id: i64,
    pub base_account: String,
    pub base_asset_code: String,
    pub base_asset_issuer: String,
    pub base_amount: i64,
    pub counter_account: String,
    pub counter_asset_code: String,
    pub counter_asset_issuer: String,
    pub counter_amount: i64,
    pub base_is_seller: bool,
}

impl Trade {
    // Cursor for this row. The token orders the same way the storage key does.
    pub fn paging_token(&self) -> String {
        format!("{}-{}", self.operation_id, self.trade_order)
    }

    pub fn base_amount_decimal(&self) -> Decimal {
        amount_to_decimal(self.base_amount)
    }

    pub fn counter_amount_decimal(&self) -> Decimal {
        amount_to_decimal(self.counter_amount)
    }

    // Price of the counter asset in units of the base asset
    pub fn price(&self) -> Decimal {
        self.counter_amount_decimal() / self.base_amount_decimal()
    }
}

// A trade as reported by a ledger close event, before registry ids and canonical
// order are assigned.
#[derive(Debug, Clone)]
pub struct TradeEvent {
    pub operation_id: i64,
    pub trade_order: i32,
    pub closed_at: DateTime<Utc>,
    pub offer_id: i64,
    pub seller: String,
    pub buyer: String,
    pub asset_sold: AssetDescriptor,
    pub amount_sold: i64,
    pub asset_bought: AssetDescriptor,
    pub amount_bought: i64,
}

#[derive(Debug, Clone)]
pub struct TradePage {
    pub records: Vec<Trade>,
    pub limit: u64,
    pub order: QueryOrder,
    pub continuation: Continuation,
}

// Select list for the canonical pair direction
const SELECT_TRADE: &str = r#"
    SELECT t.operation_id,
        t.trade_order,
        t.closed_at,
        t.offer_id,
        base_accounts.address AS base_account,
        base_assets.code AS base_asset_code,
        base_assets.issuer AS base_asset_issuer,
        t.base_amount,
        counter_accounts.address AS counter_account,
        counter_assets.code AS counter_asset_code,
        counter_assets.issuer AS counter_asset_issuer,
        t.counter_amount,
        t.base_is_seller
    "#;

// Select list for the mirrored pair direction: accounts, assets and amounts swap
// and the seller flag inverts
const SELECT_REVERSE_TRADE: &str = r#"
    SELECT t.operation_id,
        t.trade_order,
        t.closed_at,
        t.offer_id,
        counter_accounts.address AS base_account,
        counter_assets.code AS base_asset_code,
        counter_assets.issuer AS base_asset_issuer,
        t.counter_amount AS base_amount,
        base_accounts.address AS counter_account,
        base_assets.code AS counter_asset_code,
        base_assets.issuer AS counter_asset_issuer,
        t.base_amount AS counter_amount,
        NOT t.base_is_seller AS base_is_seller
    "#;

const TRADE_JOINS: &str = r#"
    FROM trades t
    JOIN accounts base_accounts ON t.base_account_id = base_accounts.id
    JOIN accounts counter_accounts ON t.counter_account_id = counter_accounts.id
    JOIN assets base_assets ON t.base_asset_id = base_assets.id
    JOIN assets counter_assets ON t.counter_asset_id = counter_assets.id
    "#;

// Query plan for one page of raw trades. Each transformation returns a new plan by
// value so concurrent requests never share builder state.
#[derive(Debug, Clone)]
pub struct TradeQuery {
    pair: Option<AssetPairQuery>,
    cursor: TradeCursor,
    order: QueryOrder,
    limit: u64,
}

impl TradeQuery {
    pub fn new(cursor: TradeCursor, order: QueryOrder, limit: u64) -> Self {
        Self {
            pair: None,
            cursor,
            order,
            limit,
        }
    }

    pub fn with_asset_pair(self, pair: AssetPairQuery) -> Self {
        Self {
            pair: Some(pair),
            ..self
        }
    }

    // Render the plan to sql. Bind order: the pair ids when filtered, then the
    // cursor pair.
    pub fn to_sql(&self) -> String {
        let select = match self.pair {
            Some(pair) if pair.flipped => SELECT_REVERSE_TRADE,
            _ => SELECT_TRADE,
        };
        let mut sql = format!("{}{}", select, TRADE_JOINS);
        let cursor_param = if self.pair.is_some() {
            sql.push_str("WHERE t.base_asset_id = $1 AND t.counter_asset_id = $2\n    AND ");
            3
        } else {
            sql.push_str("WHERE ");
            1
        };
        match self.order {
            QueryOrder::Asc => {
                sql.push_str(&format!(
                    "(t.operation_id > ${op} OR (t.operation_id = ${op} AND t.trade_order > ${ord}))\n    \
                     ORDER BY t.operation_id ASC, t.trade_order ASC\n",
                    op = cursor_param,
                    ord = cursor_param + 1
                ));
            }
            QueryOrder::Desc => {
                sql.push_str(&format!(
                    "(t.operation_id < ${op} OR (t.operation_id = ${op} AND t.trade_order < ${ord}))\n    \
                     ORDER BY t.operation_id DESC, t.trade_order DESC\n",
                    op = cursor_param,
                    ord = cursor_param + 1
                ));
            }
        }
        sql.push_str(&format!("    LIMIT {}", self.limit));
        sql
    }
}

pub async fn select_trades(pool: &PgPool, plan: &TradeQuery) -> Result<Vec<Trade>, sqlx::Error> {
    let sql = plan.to_sql();
    let mut query = sqlx::query_as::<_, Trade>(&sql);
    if let Some(pair) = &plan.pair {
        query = query.bind(pair.base_asset_id).bind(pair.counter_asset_id);
    }
    query
        .bind(plan.cursor.operation_id)
        .bind(plan.cursor.trade_order)
        .fetch_all(pool)
        .await
}

// Select one day of trades for a pair in the requested direction, ordered by the
// storage key. Used by the archive export.
pub async fn select_trades_by_day(
    pool: &PgPool,
    pair: &AssetPairQuery,
    day: DateTime<Utc>,
) -> Result<Vec<Trade>, sqlx::Error> {
    let select = if pair.flipped {
        SELECT_REVERSE_TRADE
    } else {
        SELECT_TRADE
    };
    let sql = format!(
        "{}{}WHERE t.base_asset_id = $1 AND t.counter_asset_id = $2\n    \
         AND t.closed_at >= $3 AND t.closed_at < $4\n    \
         ORDER BY t.operation_id ASC, t.trade_order ASC",
        select, TRADE_JOINS
    );
    sqlx::query_as::<_, Trade>(&sql)
        .bind(pair.base_asset_id)
        .bind(pair.counter_asset_id)
        .bind(day)
        .bind(day + Duration::days(1))
        .fetch_all(pool)
        .await
}

// The raw trade endpoint accepts an asset pair filter only as a whole. One asset on
// its own is a client error, not a broader unfiltered query.
pub fn validate_pair_filter<'a>(
    base_asset: Option<&'a AssetDescriptor>,
    counter_asset: Option<&'a AssetDescriptor>,
) -> Result<Option<(&'a AssetDescriptor, &'a AssetDescriptor)>, QueryError> {
    match (base_asset, counter_asset) {
        (Some(base), Some(counter)) => Ok(Some((base, counter))),
        (None, None) => Ok(None),
        _ => Err(QueryError::MissingPairedFilter),
    }
}

// Full pages continue from the last row returned, short pages are terminal.
pub fn next_cursor(records: &[Trade], limit: u64) -> Continuation {
    if records.len() as u64 == limit {
        match records.last() {
            Some(last) => Continuation::NextCursor {
                cursor: last.paging_token(),
            },
            None => Continuation::Exhausted,
        }
    } else {
        Continuation::Exhausted
    }
}

impl Veta {
    // Page through the raw trade log, optionally filtered to one asset pair. The
    // filter canonicalizes the pair, so either direction of the same market reads
    // the same rows.
    pub async fn select_trades(
        &self,
        base_asset: Option<&AssetDescriptor>,
        counter_asset: Option<&AssetDescriptor>,
        page: &PageQuery,
    ) -> Result<TradePage, QueryError> {
        let cursor = TradeCursor::parse(&page.cursor, page.order)?;
        let mut plan = TradeQuery::new(cursor, page.order, page.limit);
        if let Some((base, counter)) = validate_pair_filter(base_asset, counter_asset)? {
            let base_asset_id = select_asset_id(&self.pool, base).await?;
            let counter_asset_id = select_asset_id(&self.pool, counter).await?;
            plan = plan.with_asset_pair(canonical_asset_order(base_asset_id, counter_asset_id));
        }
        let records = select_trades(&self.pool, &plan).await?;
        let continuation = next_cursor(&records, page.limit);
        Ok(TradePage {
            records,
            limit: page.limit,
            order: page.order,
            continuation,
        })
    }

    // Record one executed offer match from a ledger close. Seller and buyer map to
    // base and counter from the asset id comparison so the row lands in canonical
    // order; base_is_seller keeps which side structurally sold.
    pub async fn insert_trade(&self, event: &TradeEvent) -> Result<(), QueryError> {
        let seller_account_id = select_or_insert_account_id(&self.pool, &event.seller).await?;
        let buyer_account_id = select_or_insert_account_id(&self.pool, &event.buyer).await?;
        let sold_asset_id = select_or_insert_asset_id(&self.pool, &event.asset_sold).await?;
        let bought_asset_id = select_or_insert_asset_id(&self.pool, &event.asset_bought).await?;
        let base_is_seller = sold_asset_id < bought_asset_id;
        let (
            base_account_id,
            base_asset_id,
            base_amount,
            counter_account_id,
            counter_asset_id,
            counter_amount,
        ) = if base_is_seller {
            (
                seller_account_id,
                sold_asset_id,
                event.amount_sold,
                buyer_account_id,
                bought_asset_id,
                event.amount_bought,
            )
        } else {
            (
                buyer_account_id,
                bought_asset_id,
                event.amount_bought,
                seller_account_id,
                sold_asset_id,
                event.amount_sold,
            )
        };
        let sql = r#"
            INSERT INTO trades (
                operation_id, trade_order, closed_at, offer_id, base_account_id,
                base_asset_id, base_amount, counter_account_id, counter_asset_id,
                counter_amount, base_is_seller)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#;
        sqlx::query(sql)
            .bind(event.operation_id)
            .bind(event.trade_order)
            .bind(event.closed_at)
            .bind(event.offer_id)
            .bind(base_account_id)
            .bind(base_asset_id)
            .bind(base_amount)
            .bind(counter_account_id)
            .bind(counter_asset_id)
            .bind(counter_amount)
            .bind(base_is_seller)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub async fn create_trades_table(pool: &PgPool) -> Result<(), sqlx::Error> {
    let sql = r#"
        CREATE TABLE IF NOT EXISTS trades (
            operation_id BIGINT NOT NULL,
            trade_order INT NOT NULL,
            closed_at timestamptz NOT NULL,
            offer_id BIGINT NOT NULL,
            base_account_id BIGINT NOT NULL,
            base_asset_id BIGINT NOT NULL,
            base_amount BIGINT NOT NULL,
            counter_account_id BIGINT NOT NULL,
            counter_asset_id BIGINT NOT NULL,
            counter_amount BIGINT NOT NULL,
            base_is_seller BOOLEAN NOT NULL,
            PRIMARY KEY (operation_id, trade_order)
        )
        "#;
    sqlx::query(sql).execute(pool).await?;
    Ok(())
}

// Supports canonical pair filtering and time range scans
pub async fn create_trades_pair_index(pool: &PgPool) -> Result<(), sqlx::Error> {
    let sql = r#"
        CREATE INDEX IF NOT EXISTS trades_pair_closed_at
        ON trades (base_asset_id, counter_asset_id, closed_at)
        "#;
    sqlx::query(sql).execute(pool).await?;
    Ok(())
}
