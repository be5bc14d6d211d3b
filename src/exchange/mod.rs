// Exchange collaborator - read-only position queries used by reconciliation
pub mod file;
pub mod memory;

use async_trait::async_trait;
use std::time::Duration;

use crate::errors::{TradeKeeperError, TradeKeeperResult};
use crate::logger::{self, LogTag};
use crate::types::ExchangePosition;

pub use file::FileExchange;
pub use memory::StaticExchange;

/// Source of live position state. Order placement lives in the strategy layer;
/// the core only reads.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Every open position in a product category (e.g. "linear")
    async fn list_open_positions(&self, category: &str) -> TradeKeeperResult<Vec<ExchangePosition>>;
}

/// Query with an upper bound. An elapsed timeout is reported as
/// `ExchangeTimeout`, never as an empty position list.
pub async fn fetch_positions_with_timeout(
    exchange: &dyn ExchangeClient,
    category: &str,
    timeout: Duration,
) -> TradeKeeperResult<Vec<ExchangePosition>> {
    match tokio::time::timeout(timeout, exchange.list_open_positions(category)).await {
        Ok(Ok(positions)) => {
            logger::debug(
                LogTag::Exchange,
                &format!(
                    "{} reported {} open position(s) in '{}'",
                    exchange.name(),
                    positions.len(),
                    category
                ),
            );
            Ok(positions)
        }
        Ok(Err(e)) => {
            logger::warning(
                LogTag::Exchange,
                &format!("{} position query failed: {}", exchange.name(), e),
            );
            Err(e)
        }
        Err(_) => {
            logger::warning(
                LogTag::Exchange,
                &format!(
                    "{} position query timed out after {:?}",
                    exchange.name(),
                    timeout
                ),
            );
            Err(TradeKeeperError::ExchangeTimeout {
                seconds: timeout.as_secs(),
            })
        }
    }
}
