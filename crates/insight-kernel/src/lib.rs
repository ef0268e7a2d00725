//! Pure building blocks of the insight gateway: request fingerprints,
//! prompt rendering and tolerant normalization of model output.

use insight_contracts::{AlertSnapshot, DealSnapshot, DigestRequest, Timeframe};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

pub mod normalize;
pub mod prompt;

pub use normalize::{
    parse_contact_summary, parse_digest, parse_next_step, ContactSummaryFields, DigestFields,
    NextStepFields, NormalizeError,
};
pub use prompt::{contact_summary_prompt, digest_prompt, next_step_prompt, Prompt};

pub const DEFAULT_MAX_ITEMS: usize = 5;

pub fn jcs_sha256_hex(value: &Value) -> Result<String, String> {
    let canonical = serde_jcs::to_string(value)
        .map_err(|err| format!("failed to canonicalize JSON via JCS: {err}"))?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Projection of a digest request onto exactly the fields the digest prompt
/// renders. Snapshot metadata and the fallback text never take part.
pub fn digest_fingerprint_input(req: &DigestRequest, max_items: usize) -> Value {
    json!({
        "timeframe": req.timeframe.as_str(),
        "stats": {
            "hotDeals": req.stats.hot_deals,
            "riskDeals": req.stats.risk_deals,
            "overdueTasks": req.stats.overdue_tasks,
        },
        "deals": req
            .top_deals
            .iter()
            .take(max_items)
            .map(deal_projection)
            .collect::<Vec<_>>(),
        "alerts": req
            .alerts
            .iter()
            .take(max_items)
            .map(alert_projection)
            .collect::<Vec<_>>(),
    })
}

pub fn digest_fingerprint(req: &DigestRequest, max_items: usize) -> Result<String, String> {
    jcs_sha256_hex(&digest_fingerprint_input(req, max_items))
}

pub fn digest_cache_key(timeframe: Timeframe, payload_hash: &str) -> String {
    format!("{}:{payload_hash}", timeframe.as_str())
}

fn deal_projection(deal: &DealSnapshot) -> Value {
    json!({
        "id": deal.id,
        "title": deal.title,
        "stage": deal.stage,
        "priority": deal.priority,
        "risk": deal.risk,
        "amount": deal.amount,
        "currency": deal.currency,
        "nextStep": deal.next_step,
        "targetCloseDate": deal.target_close_date,
        "accountName": deal.account_name,
    })
}

fn alert_projection(alert: &AlertSnapshot) -> Value {
    json!({
        "id": alert.id,
        "dealId": alert.deal_id,
        "kind": alert.kind,
        "severity": alert.severity,
        "message": alert.message,
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
