use crate::assets::{canonical_asset_order, select_asset_id, AssetDescriptor, AssetPairQuery};
use crate::error::QueryError;
use crate::paging::{Continuation, PageQuery, QueryOrder};
use crate::utilities::{round_down_to_resolution, round_up_to_resolution, timestamp_from_millis};
use crate::veta::Veta;
use serde::Serialize;
use sqlx::PgPool;

// One fixed width time bucket of trades for an asset pair. The timestamp is the
// bucket start in millis since epoch; prices are quoted counter over base for the
// requested direction of the pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeAggregation {
    pub timestamp: i64,
    pub trade_count: i64,
    pub base_volume: i64,
    pub counter_volume: i64,
    pub avg: f64,
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub close: f64,
}

// A trade projected onto its bucket: the timestamp is already rounded to the bucket
// start and the price is oriented for the requested pair direction. Rows arrive
// from storage ordered by closing time then storage key, so open and close fall out
// of row order.
#[derive(Debug, Clone, Copy, PartialEq, sqlx::FromRow)]
pub struct BucketedTradeRow {
    pub timestamp: i64,
    pub base_amount: i64,
    pub counter_amount: i64,
    pub price: f64,
}

#[derive(Debug, Clone)]
pub struct AggregationPage {
    pub records: Vec<TradeAggregation>,
    pub limit: u64,
    pub order: QueryOrder,
    pub resolution: i64,
    pub continuation: Continuation,
}

// Query plan for bucketed trades over one canonical pair. Transformations return a
// new plan by value. Bounds of zero mean unbounded on that side.
#[derive(Debug, Clone)]
pub struct AggregationQuery {
    pair: AssetPairQuery,
    resolution: i64,
    start_time: i64,
    end_time: i64,
}

impl AggregationQuery {
    // A resolution of zero falls back to one millisecond buckets, preserving the
    // legacy unbucketed default.
    pub fn new(pair: AssetPairQuery, resolution: i64) -> Self {
        Self {
            pair,
            resolution: resolution.max(1),
            start_time: 0,
            end_time: 0,
        }
    }

    // Align the window to whole buckets: the start rounds up into the next bucket,
    // the end rounds down. The rounded bounds may cross, which yields an empty
    // window rather than an error.
    pub fn with_time_window(self, start_time: i64, end_time: i64) -> Self {
        let start_time = if start_time > 0 {
            round_up_to_resolution(start_time, self.resolution)
        } else {
            0
        };
        let end_time = if end_time > 0 {
            round_down_to_resolution(end_time, self.resolution)
        } else {
            0
        };
        Self {
            start_time,
            end_time,
            ..self
        }
    }

    pub fn resolution(&self) -> i64 {
        self.resolution
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn end_time(&self) -> i64 {
        self.end_time
    }

    // Render the plan to sql. The bucket key and the per trade price orientation
    // are both computed in the select so every statistic downstream works on the
    // requested direction. Bind order: pair ids, then whichever bounds are set.
    pub fn to_sql(&self) -> String {
        let select = if self.pair.flipped {
            format!(
                "SELECT (CAST(EXTRACT(EPOCH FROM t.closed_at) * 1000 AS BIGINT) / {res}) * {res} AS timestamp,\n        \
                 t.counter_amount AS base_amount,\n        \
                 t.base_amount AS counter_amount,\n        \
                 t.base_amount::float8 / t.counter_amount::float8 AS price\n",
                res = self.resolution
            )
        } else {
            format!(
                "SELECT (CAST(EXTRACT(EPOCH FROM t.closed_at) * 1000 AS BIGINT) / {res}) * {res} AS timestamp,\n        \
                 t.base_amount,\n        \
                 t.counter_amount,\n        \
                 t.counter_amount::float8 / t.base_amount::float8 AS price\n",
                res = self.resolution
            )
        };
        let mut sql = format!(
            "{}    FROM trades t\n    WHERE t.base_asset_id = $1 AND t.counter_asset_id = $2\n",
            select
        );
        let mut param = 3;
        if self.start_time > 0 {
            sql.push_str(&format!("    AND t.closed_at >= ${}\n", param));
            param += 1;
        }
        if self.end_time > 0 {
            sql.push_str(&format!("    AND t.closed_at < ${}\n", param));
        }
        sql.push_str("    ORDER BY t.closed_at ASC, t.operation_id ASC, t.trade_order ASC");
        sql
    }
}

pub async fn select_bucketed_trades(
    pool: &PgPool,
    plan: &AggregationQuery,
) -> Result<Vec<BucketedTradeRow>, sqlx::Error> {
    let sql = plan.to_sql();
    let mut query = sqlx::query_as::<_, BucketedTradeRow>(&sql)
        .bind(plan.pair.base_asset_id)
        .bind(plan.pair.counter_asset_id);
    if plan.start_time > 0 {
        query = query.bind(timestamp_from_millis(plan.start_time));
    }
    if plan.end_time > 0 {
        query = query.bind(timestamp_from_millis(plan.end_time));
    }
    query.fetch_all(pool).await
}

impl TradeAggregation {
    // Fold one bucket of rows into its summary. Rows must already be in closing
    // time order: open and close come straight from the first and last row, and
    // the average is the unweighted mean of per trade prices.
    pub fn new_from_rows(timestamp: i64, rows: &[BucketedTradeRow]) -> Self {
        let open = rows.first().expect("No first row for bucket.").price;
        let agg = rows.iter().fold(
            (
                0,        // trade_count
                0,        // base_volume
                0,        // counter_volume
                0.0,      // price sum
                f64::MIN, // high
                f64::MAX, // low
                open,     // close
            ),
            |(n, bv, cv, sum, h, l, _c), r| {
                (
                    n + 1,
                    bv + r.base_amount,
                    cv + r.counter_amount,
                    sum + r.price,
                    h.max(r.price),
                    l.min(r.price),
                    r.price,
                )
            },
        );
        Self {
            timestamp,
            trade_count: agg.0,
            base_volume: agg.1,
            counter_volume: agg.2,
            avg: agg.3 / agg.0 as f64,
            high: agg.4,
            low: agg.5,
            open,
            close: agg.6,
        }
    }
}

// Group time ordered rows into their buckets. The bucket key is monotone in
// closing time, so each bucket is a contiguous run of rows.
pub fn aggregate_rows(rows: &[BucketedTradeRow]) -> Vec<TradeAggregation> {
    let mut timestamps: Vec<i64> = rows.iter().map(|r| r.timestamp).collect();
    timestamps.dedup();
    timestamps.iter().fold(Vec::new(), |mut v, ts| {
        let bucket: Vec<BucketedTradeRow> = rows
            .iter()
            .filter(|r| r.timestamp == *ts)
            .cloned()
            .collect();
        v.push(TradeAggregation::new_from_rows(*ts, &bucket));
        v
    })
}

// Buckets are built ascending; the requested order and the limit apply after
// grouping.
pub fn page_aggregations(
    mut aggregations: Vec<TradeAggregation>,
    order: QueryOrder,
    limit: u64,
) -> Vec<TradeAggregation> {
    if order == QueryOrder::Desc {
        aggregations.reverse();
    }
    aggregations.truncate(limit as usize);
    aggregations
}

// Buckets have no stable row id, so continuation is a fresh window. Ascending
// windows advance past the last bucket returned and terminate at the end bound;
// descending windows pull the exclusive end in to the last bucket returned and
// terminate at the start bound. A short page is always terminal.
pub fn next_window(
    records: &[TradeAggregation],
    plan: &AggregationQuery,
    order: QueryOrder,
    limit: u64,
) -> Continuation {
    if (records.len() as u64) < limit {
        return Continuation::Exhausted;
    }
    let last = match records.last() {
        Some(last) => last,
        None => return Continuation::Exhausted,
    };
    match order {
        QueryOrder::Asc => {
            let start_time = last.timestamp + plan.resolution();
            if start_time >= plan.end_time() {
                Continuation::Exhausted
            } else {
                Continuation::NextWindow {
                    start_time,
                    end_time: plan.end_time(),
                }
            }
        }
        QueryOrder::Desc => {
            let end_time = last.timestamp;
            if end_time <= plan.start_time() {
                Continuation::Exhausted
            } else {
                Continuation::NextWindow {
                    start_time: plan.start_time(),
                    end_time,
                }
            }
        }
    }
}

impl Veta {
    // Bucketed aggregates for one asset pair over an optional time window. Both
    // sides of the pair must resolve to registered assets; the window is aligned
    // to whole buckets before the single storage read.
    pub async fn select_trade_aggregations(
        &self,
        base_asset: &AssetDescriptor,
        counter_asset: &AssetDescriptor,
        resolution: i64,
        start_time: i64,
        end_time: i64,
        page: &PageQuery,
    ) -> Result<AggregationPage, QueryError> {
        let base_asset_id = select_asset_id(&self.pool, base_asset).await?;
        let counter_asset_id = select_asset_id(&self.pool, counter_asset).await?;
        let pair = canonical_asset_order(base_asset_id, counter_asset_id);
        let plan = AggregationQuery::new(pair, resolution).with_time_window(start_time, end_time);
        let rows = select_bucketed_trades(&self.pool, &plan).await?;
        let records = page_aggregations(aggregate_rows(&rows), page.order, page.limit);
        let continuation = next_window(&records, &plan, page.order, page.limit);
        Ok(AggregationPage {
            records,
            limit: page.limit,
            order: page.order,
            resolution: plan.resolution(),
            continuation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: i64 = 60000;
    const HOUR: i64 = 60 * MINUTE;

    // Project trades onto bucketed rows the way the storage select does: trade n
    // (1 based) closes at (n - 1) minutes with base n * 100 and counter n * n * 100,
    // so the canonical price of trade n is n.
    fn test_rows(resolution: i64, flipped: bool) -> Vec<BucketedTradeRow> {
        (1..=10)
            .map(|n: i64| {
                let closed_at = (n - 1) * MINUTE;
                let base_amount = n * 100;
                let counter_amount = n * n * 100;
                if flipped {
                    BucketedTradeRow {
                        timestamp: (closed_at / resolution) * resolution,
                        base_amount: counter_amount,
                        counter_amount: base_amount,
                        price: base_amount as f64 / counter_amount as f64,
                    }
                } else {
                    BucketedTradeRow {
                        timestamp: (closed_at / resolution) * resolution,
                        base_amount,
                        counter_amount,
                        price: counter_amount as f64 / base_amount as f64,
                    }
                }
            })
            .collect()
    }

    fn assert_close(left: f64, right: f64) {
        assert!((left - right).abs() < 1e-12, "{} != {}", left, right);
    }

    #[test]
    fn one_bucket_aggregates_all_trades() {
        let aggregations = aggregate_rows(&test_rows(HOUR, false));
        assert_eq!(aggregations.len(), 1);
        let bucket = &aggregations[0];
        assert_eq!(bucket.timestamp, 0);
        assert_eq!(bucket.trade_count, 10);
        assert_eq!(bucket.base_volume, 5500);
        assert_eq!(bucket.counter_volume, 38500);
        assert_close(bucket.avg, 5.5);
        assert_close(bucket.high, 10.0);
        assert_close(bucket.low, 1.0);
        assert_close(bucket.open, 1.0);
        assert_close(bucket.close, 10.0);
    }

    #[test]
    fn mirrored_query_inverts_prices_and_swaps_volumes() {
        let forward = aggregate_rows(&test_rows(HOUR, false));
        let reverse = aggregate_rows(&test_rows(HOUR, true));
        assert_eq!(reverse.len(), 1);
        let bucket = &reverse[0];
        assert_eq!(bucket.timestamp, forward[0].timestamp);
        assert_eq!(bucket.trade_count, forward[0].trade_count);
        assert_eq!(bucket.base_volume, forward[0].counter_volume);
        assert_eq!(bucket.counter_volume, forward[0].base_volume);
        // The average of reciprocals, not the reciprocal of the average - the
        // unweighted mean is a documented property of the aggregation
        assert_close(bucket.avg, 0.2928968253968254);
        assert_close(bucket.high, 1.0 / forward[0].low);
        assert_close(bucket.low, 1.0 / forward[0].high);
        assert_close(bucket.open, 1.0 / forward[0].open);
        assert_close(bucket.close, 1.0 / forward[0].close);
    }

    #[test]
    fn one_minute_buckets_hold_one_trade_each() {
        let aggregations = aggregate_rows(&test_rows(MINUTE, false));
        assert_eq!(aggregations.len(), 10);
        let bucket = &aggregations[4];
        assert_eq!(bucket.timestamp, 240000);
        assert_eq!(bucket.trade_count, 1);
        assert_eq!(bucket.base_volume, 500);
        assert_eq!(bucket.counter_volume, 2500);
        assert_close(bucket.avg, 5.0);
        assert_close(bucket.high, 5.0);
        assert_close(bucket.low, 5.0);
        assert_close(bucket.open, 5.0);
        assert_close(bucket.close, 5.0);
    }

    #[test]
    fn two_minute_buckets_pair_trades() {
        let aggregations = aggregate_rows(&test_rows(2 * MINUTE, false));
        assert_eq!(aggregations.len(), 5);
        let bucket = &aggregations[2];
        assert_eq!(bucket.timestamp, 240000);
        assert_eq!(bucket.trade_count, 2);
        assert_eq!(bucket.base_volume, 1100);
        assert_eq!(bucket.counter_volume, 6100);
        assert_close(bucket.avg, 5.5);
        assert_close(bucket.high, 6.0);
        assert_close(bucket.low, 5.0);
        assert_close(bucket.open, 5.0);
        assert_close(bucket.close, 6.0);
    }

    #[test]
    fn bucket_counts_conserve_the_trade_count() {
        for resolution in [1, MINUTE, 2 * MINUTE, HOUR].iter() {
            let total: i64 = aggregate_rows(&test_rows(*resolution, false))
                .iter()
                .map(|b| b.trade_count)
                .sum();
            assert_eq!(total, 10);
        }
    }

    #[test]
    fn zero_resolution_falls_back_to_millisecond_buckets() {
        let pair = canonical_asset_order(1, 2);
        assert_eq!(AggregationQuery::new(pair, 0).resolution(), 1);
        assert_eq!(AggregationQuery::new(pair, -5).resolution(), 1);
        assert_eq!(AggregationQuery::new(pair, MINUTE).resolution(), MINUTE);
    }

    #[test]
    fn window_aligns_to_whole_buckets() {
        let pair = canonical_asset_order(1, 2);
        let plan = AggregationQuery::new(pair, MINUTE).with_time_window(90000, 150000);
        assert_eq!(plan.start_time(), 120000);
        assert_eq!(plan.end_time(), 120000);
        let plan = AggregationQuery::new(pair, MINUTE).with_time_window(0, 0);
        assert_eq!(plan.start_time(), 0);
        assert_eq!(plan.end_time(), 0);
    }

    #[test]
    fn plan_renders_the_mirrored_projection_for_flipped_pairs() {
        let pair = canonical_asset_order(12, 7);
        let sql = AggregationQuery::new(pair, MINUTE)
            .with_time_window(0, 660000)
            .to_sql();
        assert!(sql.contains("t.base_amount::float8 / t.counter_amount::float8 AS price"));
        assert!(sql.contains("/ 60000) * 60000 AS timestamp"));
        assert!(sql.contains("t.closed_at < $3"));
        assert!(!sql.contains("t.closed_at >= $3"));
    }

    #[test]
    fn ascending_continuation_advances_past_the_last_bucket() {
        let pair = canonical_asset_order(1, 2);
        let plan = AggregationQuery::new(pair, MINUTE).with_time_window(0, 660000);
        let records = page_aggregations(
            aggregate_rows(&test_rows(MINUTE, false)),
            QueryOrder::Asc,
            3,
        );
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].timestamp, 120000);
        assert_eq!(
            next_window(&records, &plan, QueryOrder::Asc, 3),
            Continuation::NextWindow {
                start_time: 180000,
                end_time: 660000
            }
        );
    }

    #[test]
    fn short_pages_and_exhausted_windows_are_terminal() {
        let pair = canonical_asset_order(1, 2);
        let plan = AggregationQuery::new(pair, MINUTE).with_time_window(0, 660000);
        // Short page
        let records = aggregate_rows(&test_rows(MINUTE, false));
        assert_eq!(
            next_window(&records, &plan, QueryOrder::Asc, 20),
            Continuation::Exhausted
        );
        // Full page whose next start would reach the end bound
        let plan = AggregationQuery::new(pair, MINUTE).with_time_window(0, 600000);
        assert_eq!(
            next_window(&records, &plan, QueryOrder::Asc, 10),
            Continuation::Exhausted
        );
        // Full page against an unbounded end: no further window can be framed
        let plan = AggregationQuery::new(pair, MINUTE);
        assert_eq!(
            next_window(&records, &plan, QueryOrder::Asc, 10),
            Continuation::Exhausted
        );
    }

    #[test]
    fn descending_continuation_pulls_the_end_in() {
        let pair = canonical_asset_order(1, 2);
        let plan = AggregationQuery::new(pair, MINUTE).with_time_window(0, 660000);
        let records = page_aggregations(
            aggregate_rows(&test_rows(MINUTE, false)),
            QueryOrder::Desc,
            3,
        );
        assert_eq!(records[0].timestamp, 540000);
        assert_eq!(records[2].timestamp, 420000);
        assert_eq!(
            next_window(&records, &plan, QueryOrder::Desc, 3),
            Continuation::NextWindow {
                start_time: 0,
                end_time: 420000
            }
        );
        // Once the last bucket returned sits on the start bound the walk is done
        let plan = AggregationQuery::new(pair, MINUTE).with_time_window(420000, 660000);
        let records = page_aggregations(
            aggregate_rows(
                &test_rows(MINUTE, false)
                    .into_iter()
                    .filter(|r| r.timestamp >= 420000)
                    .collect::<Vec<_>>(),
            ),
            QueryOrder::Desc,
            3,
        );
        assert_eq!(
            next_window(&records, &plan, QueryOrder::Desc, 3),
            Continuation::Exhausted
        );
    }

    // Walk a window to exhaustion the way a client follows continuation links and
    // compare against the unpaginated fetch
    fn walk_ascending(limit: u64) -> (Vec<i64>, usize) {
        let pair = canonical_asset_order(1, 2);
        let rows = test_rows(MINUTE, false);
        let mut start_time = 0;
        let mut end_time = 660000;
        let mut collected = Vec::new();
        let mut pages = 0;
        loop {
            let plan =
                AggregationQuery::new(pair, MINUTE).with_time_window(start_time, end_time);
            let window_rows: Vec<BucketedTradeRow> = rows
                .iter()
                .filter(|r| {
                    (plan.start_time() == 0 || r.timestamp >= plan.start_time())
                        && (plan.end_time() == 0 || r.timestamp < plan.end_time())
                })
                .cloned()
                .collect();
            let records = page_aggregations(aggregate_rows(&window_rows), QueryOrder::Asc, limit);
            pages += 1;
            collected.extend(records.iter().map(|b| b.timestamp));
            match next_window(&records, &plan, QueryOrder::Asc, limit) {
                Continuation::NextWindow {
                    start_time: s,
                    end_time: e,
                } => {
                    start_time = s;
                    end_time = e;
                }
                Continuation::Exhausted => break,
                Continuation::NextCursor { .. } => panic!("Aggregations page by window."),
            }
        }
        (collected, pages)
    }

    #[test]
    fn continuation_walk_covers_every_bucket_once() {
        let expected: Vec<i64> = (0..10).map(|n| n * MINUTE).collect();
        // Ten buckets fill the first page, so one empty follow-up page closes the walk
        let (collected, pages) = walk_ascending(10);
        assert_eq!(collected, expected);
        assert_eq!(pages, 2);
        // Pages of three: the final partial page is terminal
        let (collected, pages) = walk_ascending(3);
        assert_eq!(collected, expected);
        assert_eq!(pages, 4);
        // Pages of five: the walk ends on an empty page once start reaches end
        let (collected, pages) = walk_ascending(5);
        assert_eq!(collected, expected);
        assert_eq!(pages, 3);
    }
}
