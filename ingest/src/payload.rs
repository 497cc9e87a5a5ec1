use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

/// Event names with extra gateway-side validation.
pub const PAGE_VIEW: &str = "page_view";
pub const LINK_OUT: &str = "link_out";

/// Identity signals every endpoint accepts in its body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityFields {
    /// Authoritative external identifier from a server-side SDK. Must
    /// already be identified.
    pub user_id: Option<String>,
    /// Identifier the browser SDK remembers from a past identify. A hint,
    /// not authority.
    pub remembered_id: Option<String>,
    /// Consent fallback for beacon requests that cannot set the header.
    pub allow_cookies: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackPayload {
    pub token: String,
    pub name: String,
    /// Caller-supplied event id; minted at the gateway when absent. Doubles
    /// as the insert job's dedup key.
    pub id: Option<Uuid>,
    pub url: Option<String>,
    pub href: Option<String>,
    pub referrer: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
    /// Inline user attribute updates, applied via a delayed update-user job.
    #[serde(default)]
    pub set: HashMap<String, Value>,
    pub display_name: Option<String>,
    #[serde(flatten)]
    pub identity: IdentityFields,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,
    /// Caller-chosen stable identifier, e.g. the customer's own user id.
    pub identifier: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub set: HashMap<String, Value>,
    #[serde(flatten)]
    pub identity: IdentityFields,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfilePayload {
    pub token: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub set: HashMap<String, Value>,
    #[serde(flatten)]
    pub identity: IdentityFields,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeavePayload {
    pub token: String,
    #[serde(flatten)]
    pub identity: IdentityFields,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResetPayload {
    pub token: String,
    #[serde(flatten)]
    pub identity: IdentityFields,
}
