use crate::domain::stock::{code_from_symbol, StockRecord, NOT_AVAILABLE};
use crate::source::CatalogSource;
use crate::storage::companies::{self, Company};
use sqlx::SqlitePool;

#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
    market: Option<String>,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, market: None }
    }

    pub fn with_market(mut self, market: impl Into<String>) -> Self {
        self.market = Some(market.into());
        self
    }
}

#[async_trait::async_trait]
impl CatalogSource for SqliteCatalog {
    fn source_name(&self) -> &'static str {
        "sqlite"
    }

    async fn load_records(&self) -> anyhow::Result<Vec<StockRecord>> {
        let rows = companies::list_companies(&self.pool, self.market.as_deref()).await?;
        Ok(normalize_companies(rows))
    }
}

/// Maps catalog rows 1:1, in order. Rows with a blank symbol are dropped.
pub fn normalize_companies(rows: Vec<Company>) -> Vec<StockRecord> {
    rows.into_iter()
        .filter_map(|c| {
            let current_value = match c.price {
                Some(p) => format!("{p:.2}"),
                None => NOT_AVAILABLE.to_string(),
            };
            StockRecord::new(code_from_symbol(c.symbol.trim()), c.name, c.market, current_value, "")
        })
        .collect()
}
