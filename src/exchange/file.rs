/// Exchange adapter reading positions from a JSON file
///
/// The file is expected to be kept current by an external exporter. Accepts
/// either a bare list or an object keyed by category:
///
/// ```json
/// { "linear": [ { "symbol": "BTCUSDT", "side": "Buy", "size": "0.01", "avgPrice": "65000" } ] }
/// ```
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::ExchangeClient;
use crate::errors::{TradeKeeperError, TradeKeeperResult};
use crate::types::{ExchangePosition, Side};

pub struct FileExchange {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PositionsDocument {
    List(Vec<RawPosition>),
    ByCategory(HashMap<String, Vec<RawPosition>>),
}

/// Accepts both our own field names and the broker's
#[derive(Debug, Deserialize)]
struct RawPosition {
    symbol: String,
    side: String,
    #[serde(alias = "size")]
    quantity: NumberOrString,
    #[serde(alias = "avgPrice")]
    avg_price: NumberOrString,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

impl NumberOrString {
    fn as_f64(&self, field: &str) -> TradeKeeperResult<f64> {
        match self {
            NumberOrString::Number(n) => Ok(*n),
            NumberOrString::Text(s) => s.trim().parse::<f64>().map_err(|e| {
                TradeKeeperError::ExchangeUnavailable(format!("bad {} '{}': {}", field, s, e))
            }),
        }
    }
}

impl FileExchange {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn convert(raw: Vec<RawPosition>) -> TradeKeeperResult<Vec<ExchangePosition>> {
        let mut positions = Vec::with_capacity(raw.len());
        for item in raw {
            let side = item
                .side
                .parse::<Side>()
                .map_err(TradeKeeperError::ExchangeUnavailable)?;
            let quantity = item.quantity.as_f64("quantity")?;
            // brokers list flat positions with size 0
            if quantity <= 0.0 {
                continue;
            }
            positions.push(ExchangePosition {
                symbol: item.symbol,
                side,
                quantity,
                avg_price: item.avg_price.as_f64("avg_price")?,
            });
        }
        Ok(positions)
    }
}

#[async_trait]
impl ExchangeClient for FileExchange {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn list_open_positions(&self, category: &str) -> TradeKeeperResult<Vec<ExchangePosition>> {
        let body = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            TradeKeeperError::ExchangeUnavailable(format!(
                "cannot read {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let document: PositionsDocument = serde_json::from_str(&body).map_err(|e| {
            TradeKeeperError::ExchangeUnavailable(format!(
                "cannot parse {}: {}",
                self.path.display(),
                e
            ))
        })?;

        match document {
            PositionsDocument::List(raw) => Self::convert(raw),
            PositionsDocument::ByCategory(mut by_category) => {
                Self::convert(by_category.remove(category).unwrap_or_default())
            }
        }
    }
}
