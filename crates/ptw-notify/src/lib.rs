//! Digest and error-report delivery for PTW.
//!
//! The sink contract is deliberately forgiving: rendering or delivery
//! problems are logged and reduced to `false` so a notification failure can
//! never abort an extraction run.

use std::time::Duration;

use askama::Template;
use async_trait::async_trait;
use chrono::Utc;
use ptw_core::StoredTenderRecord;
use serde::Serialize;
use tracing::warn;

pub const CRATE_NAME: &str = "ptw-notify";

pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Notifier contract consumed by the extraction orchestrator.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Render and deliver a digest for `records` to all recipients as one
    /// message. Returns `false` on any failure, never an error.
    async fn send_report(
        &self,
        records: &[StoredTenderRecord],
        business_line: &str,
        recipients: &[String],
        period_label: &str,
    ) -> bool;

    /// Deliver a failure notification under the same contract.
    async fn send_error_report(
        &self,
        error: &str,
        business_line: &str,
        recipients: &[String],
    ) -> bool;
}

#[derive(Template)]
#[template(path = "digest.html")]
struct DigestTemplate {
    business_line: String,
    period_label: String,
    rows: Vec<DigestRow>,
}

struct DigestRow {
    code: String,
    title: String,
    organization: String,
    amount: String,
    closes: String,
    link: String,
}

impl DigestRow {
    fn from_stored(stored: &StoredTenderRecord) -> Self {
        let amount = match (stored.record.available_amount, &stored.record.currency) {
            (Some(amount), Some(currency)) => format!("{amount:.0} {currency}"),
            (Some(amount), None) => format!("{amount:.0}"),
            _ => "n/a".to_string(),
        };
        let closes = stored
            .record
            .closes_at
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "n/a".to_string());
        Self {
            code: stored.record.code.clone(),
            title: stored.record.title.clone(),
            organization: stored.record.organization.clone(),
            amount,
            closes,
            link: stored.public_link.clone(),
        }
    }
}

#[derive(Template)]
#[template(path = "error_report.html")]
struct ErrorReportTemplate {
    business_line: String,
    error: String,
    reported_at: String,
}

#[derive(Debug, Serialize)]
struct DeliveryPayload<'a> {
    to: &'a [String],
    subject: String,
    html: String,
}

#[derive(Debug, Clone)]
pub struct EmailNotifierConfig {
    pub endpoint: String,
    pub timeout: Duration,
}

impl Default for EmailNotifierConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8025/send".to_string(),
            timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }
}

/// Renders HTML reports and POSTs `{to, subject, html}` to the delivery
/// endpoint. A 200 status is the only success signal.
pub struct EmailNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl EmailNotifier {
    pub fn new(config: EmailNotifierConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint,
        })
    }

    async fn deliver(&self, payload: &DeliveryPayload<'_>) -> bool {
        match self.client.post(&self.endpoint).json(payload).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => true,
            Ok(response) => {
                warn!(
                    status = response.status().as_u16(),
                    subject = %payload.subject,
                    "delivery endpoint rejected report"
                );
                false
            }
            Err(err) => {
                warn!(subject = %payload.subject, error = %err, "report delivery failed");
                false
            }
        }
    }
}

#[async_trait]
impl ReportSink for EmailNotifier {
    async fn send_report(
        &self,
        records: &[StoredTenderRecord],
        business_line: &str,
        recipients: &[String],
        period_label: &str,
    ) -> bool {
        if recipients.is_empty() {
            warn!(business_line, "no recipients configured, skipping report");
            return false;
        }
        let html = match render_digest(records, business_line, period_label) {
            Ok(html) => html,
            Err(err) => {
                warn!(business_line, error = %err, "digest rendering failed");
                return false;
            }
        };
        let payload = DeliveryPayload {
            to: recipients,
            subject: format!("[{business_line}] Tender digest for {period_label}"),
            html,
        };
        self.deliver(&payload).await
    }

    async fn send_error_report(
        &self,
        error: &str,
        business_line: &str,
        recipients: &[String],
    ) -> bool {
        if recipients.is_empty() {
            warn!(business_line, "no recipients configured, skipping error report");
            return false;
        }
        let template = ErrorReportTemplate {
            business_line: business_line.to_string(),
            error: error.to_string(),
            reported_at: Utc::now().format("%Y-%m-%d %H:%M UTC").to_string(),
        };
        let html = match template.render() {
            Ok(html) => html,
            Err(err) => {
                warn!(business_line, error = %err, "error report rendering failed");
                return false;
            }
        };
        let payload = DeliveryPayload {
            to: recipients,
            subject: format!("[{business_line}] Tender extraction failed"),
            html,
        };
        self.deliver(&payload).await
    }
}

fn render_digest(
    records: &[StoredTenderRecord],
    business_line: &str,
    period_label: &str,
) -> askama::Result<String> {
    DigestTemplate {
        business_line: business_line.to_string(),
        period_label: period_label.to_string(),
        rows: records.iter().map(DigestRow::from_stored).collect(),
    }
    .render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ptw_core::TenderRecord;

    fn stored(tender_id: i64, title: &str) -> StoredTenderRecord {
        StoredTenderRecord {
            record: TenderRecord {
                tender_id,
                code: format!("{tender_id}-LE26"),
                title: title.to_string(),
                published_at: None,
                closes_at: Some(Utc.with_ymd_and_hms(2026, 9, 15, 15, 0, 0).unwrap()),
                organization: "Port Authority".to_string(),
                organization_unit: None,
                status_code: 5,
                status_label: "published".to_string(),
                available_amount: Some(250000.0),
                currency: Some("CLP".to_string()),
                supplier_count: Some(2),
            },
            business_line: "maritime".to_string(),
            query_name: "ports".to_string(),
            extracted_at: Utc::now(),
            public_link: format!("https://tenders.example.gov/detail?code={tender_id}-LE26"),
        }
    }

    #[test]
    fn digest_lists_every_record_with_link_and_amount() {
        let html = render_digest(
            &[stored(1, "Dock repairs"), stored(2, "Crane overhaul")],
            "Maritime",
            "2026-08-30",
        )
        .unwrap();
        assert!(html.contains("Dock repairs"));
        assert!(html.contains("Crane overhaul"));
        assert!(html.contains("https://tenders.example.gov/detail?code=1-LE26"));
        assert!(html.contains("250000 CLP"));
        assert!(html.contains("2026-09-15 15:00 UTC"));
        assert!(!html.contains("No new tenders"));
    }

    #[test]
    fn empty_digest_uses_the_empty_state_variant() {
        let html = render_digest(&[], "Maritime", "2026-08-30").unwrap();
        assert!(html.contains("No new tenders were found for this period."));
        assert!(!html.contains("<table"));
    }

    #[test]
    fn missing_amount_and_close_date_render_as_placeholders() {
        let mut record = stored(3, "Unpriced study");
        record.record.available_amount = None;
        record.record.currency = None;
        record.record.closes_at = None;
        let row = DigestRow::from_stored(&record);
        assert_eq!(row.amount, "n/a");
        assert_eq!(row.closes, "n/a");
    }

    #[test]
    fn error_report_includes_the_failure_text() {
        let html = ErrorReportTemplate {
            business_line: "Maritime".to_string(),
            error: "store is not connected".to_string(),
            reported_at: "2026-08-30 12:00 UTC".to_string(),
        }
        .render()
        .unwrap();
        assert!(html.contains("Extraction failed: Maritime"));
        assert!(html.contains("store is not connected"));
    }

    #[test]
    fn delivery_payload_serializes_expected_shape() {
        let to = vec!["ops@example.com".to_string()];
        let payload = DeliveryPayload {
            to: &to,
            subject: "[Maritime] Tender digest for 2026-08-30".to_string(),
            html: "<html></html>".to_string(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["to"][0], "ops@example.com");
        assert!(value["subject"].as_str().unwrap().contains("Maritime"));
        assert!(value["html"].as_str().is_some());
    }

    #[tokio::test]
    async fn unreachable_endpoint_reduces_to_false() {
        let notifier = EmailNotifier::new(EmailNotifierConfig {
            // Reserved TEST-NET-1 address: connection refused or timeout.
            endpoint: "http://192.0.2.1:9/send".to_string(),
            timeout: Duration::from_millis(200),
        })
        .unwrap();
        let ok = notifier
            .send_report(&[], "Maritime", &["ops@example.com".to_string()], "2026-08-30")
            .await;
        assert!(!ok);
    }
}
