use crate::error::QueryError;
use serde::Serialize;
use std::convert::TryFrom;
use std::fmt;

pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const MAX_PAGE_SIZE: u64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOrder {
    Asc,
    Desc,
}

impl QueryOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryOrder::Asc => "asc",
            QueryOrder::Desc => "desc",
        }
    }
}

impl fmt::Display for QueryOrder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for QueryOrder {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "asc" => Ok(QueryOrder::Asc),
            "desc" => Ok(QueryOrder::Desc),
            other => Err(format!("{} is not a supported query order.", other)),
        }
    }
}

// Paging parameters shared by the raw trade and aggregation endpoints. A limit of
// zero falls back to the default page size and limits above the max are capped.
#[derive(Debug, Clone)]
pub struct PageQuery {
    pub cursor: String,
    pub order: QueryOrder,
    pub limit: u64,
}

impl PageQuery {
    pub fn new(cursor: &str, order: QueryOrder, limit: u64) -> Self {
        let limit = match limit {
            0 => DEFAULT_PAGE_SIZE,
            l => l.min(MAX_PAGE_SIZE),
        };
        Self {
            cursor: cursor.to_string(),
            order,
            limit,
        }
    }
}

// Parsed form of an opaque trade cursor. The pair sorts the same way the
// (operation_id, trade_order) storage key does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeCursor {
    pub operation_id: i64,
    pub trade_order: i32,
}

impl TradeCursor {
    // An empty cursor anchors ascending pages at the start of the trade log and
    // descending pages at the end. A token missing the order half defaults it to
    // the maximum; an oversized order half saturates at the 32 bit boundary.
    pub fn parse(token: &str, order: QueryOrder) -> Result<Self, QueryError> {
        if token.is_empty() {
            return Ok(match order {
                QueryOrder::Asc => Self {
                    operation_id: 0,
                    trade_order: 0,
                },
                QueryOrder::Desc => Self {
                    operation_id: i64::MAX,
                    trade_order: i32::MAX,
                },
            });
        }
        let invalid = || QueryError::InvalidCursor(token.to_string());
        let mut parts = token.splitn(2, '-');
        let operation_id = parts
            .next()
            .ok_or_else(invalid)?
            .parse::<i64>()
            .map_err(|_| invalid())?;
        let trade_order = match parts.next() {
            Some(p) => p.parse::<i64>().map_err(|_| invalid())?,
            None => i64::MAX,
        };
        if operation_id < 0 || trade_order < 0 {
            return Err(invalid());
        }
        Ok(Self {
            operation_id,
            trade_order: trade_order.min(i32::MAX as i64) as i32,
        })
    }
}

impl fmt::Display for TradeCursor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.operation_id, self.trade_order)
    }
}

// Where the next page starts, if anywhere. The rendering collaborator consumes this
// to build whatever link representation it needs. Raw trade pages continue from a
// row cursor, aggregation pages continue from an adjusted time window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Continuation {
    Exhausted,
    NextCursor { cursor: String },
    NextWindow { start_time: i64, end_time: i64 },
}
