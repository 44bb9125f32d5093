use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// A row of the relational catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Company {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    pub market: String,
    pub price: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCompany {
    pub symbol: String,
    pub name: String,
    pub market: String,
    pub price: Option<f64>,
}

pub async fn list_companies(
    pool: &SqlitePool,
    market: Option<&str>,
) -> anyhow::Result<Vec<Company>> {
    let rows = match market {
        Some(market) => {
            sqlx::query_as::<_, Company>(
                "SELECT id, symbol, name, market, price, created_at, updated_at \
                 FROM companies \
                 WHERE market = ?1 \
                 ORDER BY symbol ASC",
            )
            .bind(market)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, Company>(
                "SELECT id, symbol, name, market, price, created_at, updated_at \
                 FROM companies \
                 ORDER BY symbol ASC",
            )
            .fetch_all(pool)
            .await
        }
    };

    rows.context("select companies failed")
}

pub async fn get_company(pool: &SqlitePool, symbol: &str) -> anyhow::Result<Option<Company>> {
    sqlx::query_as::<_, Company>(
        "SELECT id, symbol, name, market, price, created_at, updated_at \
         FROM companies \
         WHERE symbol = ?1",
    )
    .bind(symbol)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("select company failed (symbol={symbol})"))
}

/// Inserts or refreshes companies by symbol in one transaction. `created_at` survives updates.
pub async fn upsert_companies(pool: &SqlitePool, items: &[NewCompany]) -> anyhow::Result<u64> {
    anyhow::ensure!(!items.is_empty(), "items must be non-empty");

    let chunk_size: usize = std::env::var("COMPANIES_UPSERT_BATCH")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(200);
    anyhow::ensure!(chunk_size >= 1, "COMPANIES_UPSERT_BATCH must be >= 1");

    let now = Utc::now();
    let mut tx = pool.begin().await.context("begin transaction failed")?;
    let mut affected: u64 = 0;

    for (batch_idx, chunk) in items.chunks(chunk_size).enumerate() {
        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO companies (symbol, name, market, price, created_at, updated_at) ",
        );
        qb.push_values(chunk, |mut b, item| {
            b.push_bind(item.symbol.trim())
                .push_bind(item.name.trim())
                .push_bind(item.market.trim())
                .push_bind(item.price)
                .push_bind(now)
                .push_bind(now);
        });
        qb.push(
            " ON CONFLICT (symbol) DO UPDATE \
               SET name = excluded.name, market = excluded.market, price = excluded.price, \
                   updated_at = excluded.updated_at",
        );

        let res = qb
            .build()
            .execute(&mut *tx)
            .await
            .context("batch upsert companies failed")?;
        affected += res.rows_affected();

        tracing::debug!(batch_idx, batch_size = chunk.len(), "companies batch upsert");
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(affected)
}
