use crate::config::Settings;
use crate::domain::ranking::RankedResult;
use crate::notify::{Notifier, NotifyError, NotifyErrorKind, RunSummary};
use anyhow::Context;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_USERNAME: &str = "kabuscan";
const EMBED_COLOR: u32 = 0x2E_CC_71;

// Discord rejects embed descriptions longer than this.
const MAX_DESCRIPTION_CHARS: usize = 4096;
const MAX_NAME_CHARS: usize = 16;

#[derive(Debug, Clone)]
pub struct DiscordWebhook {
    http: reqwest::Client,
    webhook_url: String,
    username: String,
}

#[derive(Debug, Serialize)]
struct WebhookPayload {
    username: String,
    content: String,
    embeds: Vec<Embed>,
}

#[derive(Debug, Serialize)]
struct Embed {
    title: String,
    description: String,
    color: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbedFooter {
    text: String,
}

impl DiscordWebhook {
    pub fn new(webhook_url: impl Into<String>, username: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("failed to build webhook http client")?;

        Ok(Self {
            http,
            webhook_url: webhook_url.into(),
            username: username.unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
        })
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let url = settings.require_discord_webhook_url()?.to_string();
        let username = std::env::var("DISCORD_USERNAME")
            .ok()
            .filter(|s| !s.trim().is_empty());
        Self::new(url, username)
    }

    fn payload(&self, summary: &RunSummary, results: &[RankedResult]) -> WebhookPayload {
        WebhookPayload {
            username: self.username.clone(),
            content: format!(
                "Top {} stocks by analysis score for {}",
                results.len(),
                summary.as_of_date
            ),
            embeds: vec![Embed {
                title: format!("Stock analysis ranking ({})", summary.as_of_date),
                description: render_description(results),
                color: EMBED_COLOR,
                footer: Some(EmbedFooter {
                    text: format!(
                        "analyzed {} / failed {}",
                        summary.analyzed, summary.failed
                    ),
                }),
                timestamp: Some(chrono::Utc::now().to_rfc3339()),
            }],
        }
    }
}

#[async_trait::async_trait]
impl Notifier for DiscordWebhook {
    fn channel_name(&self) -> &'static str {
        "discord"
    }

    async fn notify(
        &self,
        summary: &RunSummary,
        results: &[RankedResult],
    ) -> Result<(), NotifyError> {
        if results.is_empty() {
            return Err(NotifyError::new(
                NotifyErrorKind::EmptyInput,
                "no ranked results to deliver",
            ));
        }

        let body = serde_json::to_vec(&self.payload(summary, results))
            .map_err(|e| NotifyError::new(NotifyErrorKind::Encode, e.to_string()))?;

        let res = self
            .http
            .post(&self.webhook_url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| NotifyError::new(NotifyErrorKind::Transport, e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(NotifyError::new(
                NotifyErrorKind::HttpStatus(status.as_u16()),
                text,
            ));
        }

        tracing::info!(results = results.len(), %status, "discord webhook delivered");
        Ok(())
    }
}

/// One fixed-width line per result inside a code block, dropping tail lines that would push the
/// description past Discord's limit.
pub fn render_description(results: &[RankedResult]) -> String {
    const FENCE_OPEN: &str = "```\n";
    const FENCE_CLOSE: &str = "```";

    let symbol_w = results.iter().map(|r| r.symbol.chars().count()).max().unwrap_or(0);
    let name_w = results
        .iter()
        .map(|r| r.company_name.chars().count().min(MAX_NAME_CHARS))
        .max()
        .unwrap_or(0);

    let lines: Vec<String> = results
        .iter()
        .map(|r| render_line(r, symbol_w, name_w))
        .collect();

    let fixed = FENCE_OPEN.len() + FENCE_CLOSE.len();
    let mut used = fixed;
    let mut kept = 0;
    for (i, line) in lines.iter().enumerate() {
        let remaining = lines.len() - i - 1;
        let marker = if remaining > 0 {
            more_marker(remaining).chars().count() + 1
        } else {
            0
        };
        let cost = line.chars().count() + 1;
        if used + cost + marker > MAX_DESCRIPTION_CHARS {
            break;
        }
        used += cost;
        kept += 1;
    }

    let mut out = String::from(FENCE_OPEN);
    for line in &lines[..kept] {
        out.push_str(line);
        out.push('\n');
    }
    if kept < lines.len() {
        out.push_str(&more_marker(lines.len() - kept));
        out.push('\n');
    }
    out.push_str(FENCE_CLOSE);
    out
}

fn render_line(r: &RankedResult, symbol_w: usize, name_w: usize) -> String {
    let name = fit_name(&r.company_name, name_w);
    format!(
        "{:>2}. {:<symbol_w$} | {} | conf {:>5.1}% | score {:.3} | {}",
        r.rank,
        r.symbol,
        name,
        r.confidence * 100.0,
        r.overall_score,
        r.detail_url,
    )
}

fn fit_name(name: &str, width: usize) -> String {
    let count = name.chars().count();
    if count > width {
        let mut s: String = name.chars().take(width.saturating_sub(1)).collect();
        s.push('~');
        s
    } else {
        let mut s = name.to_string();
        s.extend(std::iter::repeat(' ').take(width - count));
        s
    }
}

fn more_marker(n: usize) -> String {
    format!("... and {n} more")
}
