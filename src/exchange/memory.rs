/// In-memory exchange with scriptable failures, for dry runs and tests
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::ExchangeClient;
use crate::errors::{TradeKeeperError, TradeKeeperResult};
use crate::types::ExchangePosition;

#[derive(Default)]
pub struct StaticExchange {
    positions: Mutex<Vec<ExchangePosition>>,
    /// Consumed front to back, one per call, before positions are served
    queued_failures: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl StaticExchange {
    pub fn new(positions: Vec<ExchangePosition>) -> Self {
        Self {
            positions: Mutex::new(positions),
            ..Default::default()
        }
    }

    pub fn set_positions(&self, positions: Vec<ExchangePosition>) {
        *self.positions.lock() = positions;
    }

    /// Make the next call fail with `ExchangeUnavailable`
    pub fn fail_next(&self, message: &str) {
        self.queued_failures.lock().push_back(message.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExchangeClient for StaticExchange {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn list_open_positions(&self, _category: &str) -> TradeKeeperResult<Vec<ExchangePosition>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.queued_failures.lock().pop_front() {
            return Err(TradeKeeperError::ExchangeUnavailable(message));
        }
        Ok(self.positions.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    #[tokio::test]
    async fn test_failure_is_consumed_once() {
        let exchange = StaticExchange::new(vec![ExchangePosition::new("BTCUSDT", Side::Long, 1.0, 1.0)]);
        exchange.fail_next("503");

        assert!(exchange.list_open_positions("linear").await.is_err());
        assert_eq!(exchange.list_open_positions("linear").await.unwrap().len(), 1);
        assert_eq!(exchange.call_count(), 2);
    }
}
