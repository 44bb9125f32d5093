use kabuscan_core::domain::stock::StockRecord;
use kabuscan_core::source::csv::CsvCatalog;
use kabuscan_core::source::CatalogSource;
use kabuscan_core::storage::companies::{self, NewCompany};
use std::path::Path;

/// Seeds the relational catalog from a flat-file catalog. Returns rows affected.
pub async fn import_csv(pool: &sqlx::SqlitePool, csv_path: &Path) -> anyhow::Result<u64> {
    let records = CsvCatalog::new(csv_path).load_records().await?;
    anyhow::ensure!(
        !records.is_empty(),
        "no importable rows in {}",
        csv_path.display()
    );

    let items: Vec<NewCompany> = records.iter().map(to_new_company).collect();
    let affected = companies::upsert_companies(pool, &items).await?;

    tracing::info!(
        path = %csv_path.display(),
        rows = items.len(),
        affected,
        "imported csv catalog"
    );
    Ok(affected)
}

fn to_new_company(r: &StockRecord) -> NewCompany {
    NewCompany {
        symbol: r.code.clone(),
        name: r.name.clone(),
        market: r.market.clone(),
        price: parse_price(&r.current_value),
    }
}

fn parse_price(s: &str) -> Option<f64> {
    let t = s.trim().replace(',', "");
    t.parse::<f64>().ok().filter(|v| v.is_finite())
}
