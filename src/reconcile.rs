//! Delivery-status reconciliation.
//!
//! Carriers report delivery progress asynchronously, out of band with
//! dispatch. This module is the single ingress for those receipts: the
//! transport layer calls [`report_delivery_status`] with whatever the
//! carrier posted, and the matching recipient record — if any — is
//! patched. The mapping only ever *sets* a status, so replays and
//! out-of-order receipts are harmless.

use tracing::{debug, trace};

use crate::store::{JobStore, RecipientStatus, StoreError};

/// Map a carrier status string onto a recipient lifecycle status.
///
/// Strings outside the mapping (e.g. `queued`, `accepted`) are recorded
/// verbatim on the recipient but do not move its lifecycle.
fn lifecycle_for(status: &str) -> Option<RecipientStatus> {
    match status {
        "delivered" => Some(RecipientStatus::Delivered),
        "failed" | "undelivered" => Some(RecipientStatus::Failed),
        "sent" => Some(RecipientStatus::Sent),
        _ => None,
    }
}

/// Apply one delivery-status event. Returns whether a recipient matched.
///
/// Lookup order: exact carrier message id first; failing that, the first
/// recipient at `address` still in `queued`, `sending`, or `sent` by
/// store order. Events matching nothing are dropped silently — receipts
/// can race ahead of record creation or reference messages this process
/// never sent, and neither is an error.
///
/// # Errors
///
/// Returns [`StoreError`] only for storage failures; an unmatched event
/// is `Ok(false)`.
pub async fn report_delivery_status(
    store: &JobStore,
    message_id: Option<&str>,
    address: Option<&str>,
    status: &str,
) -> Result<bool, StoreError> {
    let mut found = None;
    if let Some(mid) = message_id {
        found = store.find_by_provider_message_id(mid).await?;
    }
    if found.is_none() {
        if let Some(addr) = address {
            found = store.find_active_by_address(addr).await?;
        }
    }

    let Some(recipient) = found else {
        trace!(?message_id, ?address, status, "delivery receipt matched no recipient");
        return Ok(false);
    };

    store
        .apply_delivery(&recipient.id, lifecycle_for(status), status)
        .await?;
    debug!(
        recipient_id = %recipient.id,
        address = %recipient.address,
        status,
        "delivery receipt applied"
    );
    Ok(true)
}
