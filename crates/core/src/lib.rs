pub mod analysis;
pub mod dispatch;
pub mod domain;
pub mod notify;
pub mod rank;
pub mod source;
pub mod storage;
pub mod time;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub analysis_api_base_url: Option<String>,
        pub discord_webhook_url: Option<String>,
        pub stock_csv_path: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: non_empty_env("DATABASE_URL"),
                sentry_dsn: non_empty_env("SENTRY_DSN"),
                analysis_api_base_url: non_empty_env("ANALYSIS_API_BASE_URL"),
                discord_webhook_url: non_empty_env("DISCORD_WEBHOOK_URL"),
                stock_csv_path: non_empty_env("STOCK_CSV_PATH"),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_analysis_api_base_url(&self) -> anyhow::Result<&str> {
            self.analysis_api_base_url
                .as_deref()
                .context("ANALYSIS_API_BASE_URL is required")
        }

        pub fn require_discord_webhook_url(&self) -> anyhow::Result<&str> {
            self.discord_webhook_url
                .as_deref()
                .context("DISCORD_WEBHOOK_URL is required")
        }

        pub fn require_stock_csv_path(&self) -> anyhow::Result<&str> {
            self.stock_csv_path
                .as_deref()
                .context("STOCK_CSV_PATH is required (or pass --csv-path)")
        }
    }

    fn non_empty_env(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|s| !s.trim().is_empty())
    }
}
