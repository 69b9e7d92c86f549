//! App hook delivery index operations.
//!
//! The retry reconciler walks `GET /app/hook/deliveries` newest-first and
//! requests redelivery for anything that failed and never reached the
//! events table. GitHub pages this endpoint with an opaque cursor carried
//! in the `Link` response header.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::GitHubClient;
use crate::error::ApiError;

/// Page size for delivery listing.
const DELIVERIES_PER_PAGE: u32 = 100;

/// One entry in the App's hook delivery index.
///
/// `guid` is the value the webhook receives in `X-GitHub-Delivery` and the
/// key the events table stores as `delivery_id`; `id` is the numeric
/// identifier redelivery requests use.
#[derive(Debug, Clone, Deserialize)]
pub struct HookDelivery {
    /// Numeric delivery identifier (used for redelivery).
    pub id: u64,

    /// Delivery GUID, the `X-GitHub-Delivery` header value.
    pub guid: String,

    /// When GitHub attempted the delivery.
    pub delivered_at: DateTime<Utc>,

    /// Whether this entry is itself a redelivery.
    #[serde(default)]
    pub redelivery: bool,

    /// HTTP status code our endpoint returned, 0 if unreachable.
    #[serde(default)]
    pub status_code: u16,

    /// Event name (e.g. `workflow_run`, `push`).
    pub event: String,

    /// Event action, when the event type has one.
    #[serde(default)]
    pub action: Option<String>,
}

impl HookDelivery {
    /// Whether our endpoint accepted this delivery.
    ///
    /// GitHub records the exact status the webhook returned; only a 200-class
    /// answer counts as delivered. The reconciler additionally checks the
    /// events table before redelivering, because an accepted delivery can
    /// still have failed to persist.
    pub fn succeeded(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// One page of the delivery index plus the cursor for the next page.
#[derive(Debug, Clone)]
pub struct DeliveryPage {
    /// Deliveries in GitHub's order (newest first).
    pub deliveries: Vec<HookDelivery>,

    /// Cursor for the next (older) page; `None` on the last page.
    pub next_cursor: Option<String>,
}

impl GitHubClient {
    /// List one page of the App's hook deliveries.
    ///
    /// # Arguments
    ///
    /// * `cursor` - Opaque cursor from a previous page, or `None` for the
    ///   newest page
    ///
    /// # Errors
    ///
    /// Returns `ApiError::AuthenticationFailed` on 401 (token refresh
    /// signal) and `ApiError::Http` for other error statuses.
    pub async fn list_deliveries(&self, cursor: Option<&str>) -> Result<DeliveryPage, ApiError> {
        let path = match cursor {
            Some(cursor) => format!(
                "app/hook/deliveries?per_page={}&cursor={}",
                DELIVERIES_PER_PAGE, cursor
            ),
            None => format!("app/hook/deliveries?per_page={}", DELIVERIES_PER_PAGE),
        };

        let response = self.get_as_app(&path).await?;

        let status = response.status();
        if !status.is_success() {
            let message = Self::error_body(response).await;
            return Err(ApiError::from_status(status.as_u16(), message));
        }

        let next_cursor = response
            .headers()
            .get("link")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_next_cursor);

        let deliveries: Vec<HookDelivery> = response.json().await?;

        Ok(DeliveryPage {
            deliveries,
            next_cursor,
        })
    }

    /// Request redelivery of a failed delivery.
    ///
    /// The redelivered payload re-enters through the webhook endpoint, so
    /// signature verification remains the sole insertion authority for the
    /// events table.
    pub async fn redeliver(&self, delivery_id: u64) -> Result<(), ApiError> {
        tracing::debug!(delivery_id, "Requesting redelivery");

        let path = format!("app/hook/deliveries/{}/attempts", delivery_id);
        let response = self.post_as_app(&path).await?;

        let status = response.status();
        if !status.is_success() {
            let message = Self::error_body(response).await;
            return Err(ApiError::from_status(status.as_u16(), message));
        }

        Ok(())
    }
}

/// Extract the `cursor` query parameter from a `Link` header's `rel="next"`
/// entry.
///
/// The deliveries endpoint does not use page numbers; the only way to the
/// next page is the cursor GitHub hands back here.
fn parse_next_cursor(link_header: &str) -> Option<String> {
    for part in link_header.split(',') {
        let part = part.trim();
        if !part.contains("rel=\"next\"") {
            continue;
        }

        let url_part = part.split(';').next()?.trim();
        let url_str = url_part.strip_prefix('<')?.strip_suffix('>')?;
        let url = url::Url::parse(url_str).ok()?;

        for (name, value) in url.query_pairs() {
            if name == "cursor" {
                return Some(value.into_owned());
            }
        }
    }
    None
}

#[cfg(test)]
#[path = "deliveries_tests.rs"]
mod tests;
