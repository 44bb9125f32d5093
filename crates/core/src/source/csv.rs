use crate::domain::stock::{StockRecord, NOT_AVAILABLE};
use crate::source::CatalogSource;
use anyhow::Context;
use encoding_rs::SHIFT_JIS;
use std::path::PathBuf;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Column order: code, name, market, price, change.
const MIN_COLUMNS: usize = 5;

#[derive(Debug, Clone)]
pub struct CsvCatalog {
    path: PathBuf,
}

impl CsvCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl CatalogSource for CsvCatalog {
    fn source_name(&self) -> &'static str {
        "csv"
    }

    async fn load_records(&self) -> anyhow::Result<Vec<StockRecord>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("failed to read catalog file {}", self.path.display()))?;

        let records = tokio::task::spawn_blocking(move || normalize_csv(&bytes))
            .await
            .context("join csv parse task failed")?;

        tracing::debug!(
            path = %self.path.display(),
            records = records.len(),
            "loaded csv catalog"
        );
        Ok(records)
    }
}

/// Parses a flat-file catalog. The first row is a header. Rows with fewer than five columns,
/// an empty code, or broken quoting are skipped.
pub fn normalize_csv(bytes: &[u8]) -> Vec<StockRecord> {
    let text = decode_catalog_text(bytes);

    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut out = Vec::new();
    let mut skipped: usize = 0;
    for row in reader.records() {
        let Ok(row) = row else {
            skipped += 1;
            continue;
        };
        if row.len() < MIN_COLUMNS {
            skipped += 1;
            continue;
        }

        let current_value = clean_field(&row[3]);
        let current_value = if current_value.is_empty() {
            NOT_AVAILABLE
        } else {
            current_value
        };

        match StockRecord::new(
            clean_field(&row[0]),
            clean_field(&row[1]),
            clean_field(&row[2]),
            current_value,
            clean_field(&row[4]),
        ) {
            Some(record) => out.push(record),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::debug!(skipped, kept = out.len(), "skipped malformed csv rows");
    }
    out
}

/// UTF-8 (with or without BOM) is used as-is; anything else is treated as Shift_JIS.
fn decode_catalog_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (cow, had_errors) = SHIFT_JIS.decode_without_bom_handling(bytes);
            if had_errors {
                tracing::warn!("catalog is neither UTF-8 nor clean Shift_JIS; replaced invalid bytes");
            }
            cow.into_owned()
        }
    }
}

fn clean_field(s: &str) -> &str {
    s.trim_matches(|c: char| c == '\u{feff}' || c == '"' || c.is_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\u{feff}code,name,market,price,change\n\
        7203,トヨタ自動車,Prime,2850.5,+1.2%\n\
        \"6758\",\" ソニーグループ \",Prime,,\n\
        9984,SoftBank,Prime\n\
        ,Nameless,Prime,100,0\n\
        \n\
        4755,楽天グループ,Prime,N/A,-0.4%\n";

    #[test]
    fn parses_rows_and_skips_malformed_ones() {
        let records = normalize_csv(SAMPLE.as_bytes());
        let codes: Vec<_> = records.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, ["7203", "6758", "4755"]);

        assert_eq!(records[0].name, "トヨタ自動車");
        assert_eq!(records[0].current_value, "2850.5");
        assert_eq!(records[0].change_rate, "+1.2%");

        assert_eq!(records[1].name, "ソニーグループ");
        assert_eq!(records[1].current_value, "N/A");
        assert_eq!(records[1].change_rate, "");
    }

    #[test]
    fn three_column_row_yields_nothing() {
        let records = normalize_csv(b"code,name,market,price,change\n1301,Kyokuyo,Prime\n");
        assert!(records.is_empty());
    }

    #[test]
    fn header_only_is_empty_not_error() {
        assert!(normalize_csv(b"code,name,market,price,change\n").is_empty());
        assert!(normalize_csv(b"").is_empty());
    }

    #[test]
    fn duplicates_are_kept_in_order() {
        let input = b"h1,h2,h3,h4,h5\n7203,A,P,1,0\n6758,B,P,1,0\n7203,A,P,1,0\n";
        let codes: Vec<_> = normalize_csv(input).into_iter().map(|r| r.code).collect();
        assert_eq!(codes, ["7203", "6758", "7203"]);
    }

    #[test]
    fn normalization_is_idempotent() {
        let a = normalize_csv(SAMPLE.as_bytes());
        let b = normalize_csv(SAMPLE.as_bytes());
        assert_eq!(a, b);
    }

    #[test]
    fn decodes_shift_jis() {
        let text = "code,name,market,price,change\n7203,トヨタ自動車,プライム,2850,0.5\n";
        let (sjis, _, _) = SHIFT_JIS.encode(text);
        assert!(std::str::from_utf8(&sjis).is_err());

        let records = normalize_csv(&sjis);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "トヨタ自動車");
        assert_eq!(records[0].market, "プライム");
    }

    #[test]
    fn extra_columns_are_ignored() {
        let records = normalize_csv(b"a,b,c,d,e,f\n7203,Toyota,Prime,1,2,extra\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].change_rate, "2");
    }

    #[tokio::test]
    async fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let catalog = CsvCatalog::new(file.path());
        let records = catalog.load_records().await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].symbol(), "7203.T");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = CsvCatalog::new(dir.path().join("nope.csv"));
        assert!(catalog.load_records().await.is_err());
    }
}
