pub mod csv;
pub mod sqlite;

use crate::domain::stock::StockRecord;

/// Anything that can list catalog entries as normalized `StockRecord`s, in source order and
/// without de-duplication. Only a source that cannot be opened or queried at all is an error;
/// malformed rows are skipped.
#[async_trait::async_trait]
pub trait CatalogSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn load_records(&self) -> anyhow::Result<Vec<StockRecord>>;
}
