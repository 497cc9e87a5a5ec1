use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use common_types::{DeviceRow, ProjectId, UserId};

use crate::hash;

/// Normalized client signals parsed from a user agent string.
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    pub os_name: String,
    pub os_version: String,
    pub client_name: String,
    pub client_version: String,
    pub client_type: String,
    pub device_type: String,
}

static OS_VERSION: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"Windows NT ([\d.]+)").unwrap(),
            "Windows",
        ),
        (
            Regex::new(r"Mac OS X ([\d_.]+)").unwrap(),
            "macOS",
        ),
        (
            Regex::new(r"(?:iPhone|iPad|iPod).+?OS ([\d_]+)").unwrap(),
            "iOS",
        ),
        (Regex::new(r"Android ([\d.]+)").unwrap(), "Android"),
        (Regex::new(r"CrOS \S+ ([\d.]+)").unwrap(), "Chrome OS"),
    ]
});

// Order matters: many agents also carry "Safari" and "Chrome" tokens, so
// the more specific vendor tokens are tried first. Several vendors
// self-report under a second name (Edg, OPR, CriOS, FxiOS); we normalize
// those to the plain browser name.
static CLIENT_VERSION: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"Edg(?:e|A|iOS)?/([\d.]+)").unwrap(), "Edge"),
        (Regex::new(r"OPR/([\d.]+)").unwrap(), "Opera"),
        (
            Regex::new(r"SamsungBrowser/([\d.]+)").unwrap(),
            "Samsung Internet",
        ),
        (Regex::new(r"CriOS/([\d.]+)").unwrap(), "Chrome"),
        (Regex::new(r"FxiOS/([\d.]+)").unwrap(), "Firefox"),
        (Regex::new(r"Firefox/([\d.]+)").unwrap(), "Firefox"),
        (Regex::new(r"Chrome/([\d.]+)").unwrap(), "Chrome"),
        (Regex::new(r"Version/([\d.]+).*Safari").unwrap(), "Safari"),
    ]
});

static MOBILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Mobile|iPhone|iPod|Android.+Mobile").unwrap());
static TABLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"iPad|Tablet").unwrap());

const UNKNOWN: &str = "unknown";

impl Fingerprint {
    /// Parse a raw user agent into normalized signals. Every field falls
    /// back to "unknown" rather than failing; a fingerprint is always
    /// producible.
    pub fn parse(user_agent: &str) -> Fingerprint {
        let (os_name, os_version) = OS_VERSION
            .iter()
            .find_map(|(re, name)| {
                re.captures(user_agent)
                    .map(|c| (name.to_string(), c[1].replace('_', ".")))
            })
            .unwrap_or_else(|| {
                if user_agent.contains("Linux") {
                    ("Linux".to_string(), UNKNOWN.to_string())
                } else {
                    (UNKNOWN.to_string(), UNKNOWN.to_string())
                }
            });

        let (client_name, client_version) = CLIENT_VERSION
            .iter()
            .find_map(|(re, name)| {
                re.captures(user_agent)
                    .map(|c| (name.to_string(), c[1].to_string()))
            })
            .unwrap_or((UNKNOWN.to_string(), UNKNOWN.to_string()));

        let device_type = if TABLET.is_match(user_agent) {
            "tablet"
        } else if MOBILE.is_match(user_agent) {
            "mobile"
        } else {
            "desktop"
        };

        Fingerprint {
            os_name,
            os_version,
            client_name,
            client_version,
            client_type: "browser".to_string(),
            device_type: device_type.to_string(),
        }
    }

    /// The normalized signature the device id hashes over.
    pub fn signature(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}",
            self.os_name,
            self.os_version,
            self.client_name,
            self.client_version,
            self.client_type,
            self.device_type
        )
    }

    pub fn into_device_row(
        self,
        project_id: ProjectId,
        user_id: UserId,
        created_at: DateTime<Utc>,
    ) -> DeviceRow {
        let id = hash::device_id(project_id, user_id, &self.signature());

        DeviceRow {
            project_id,
            user_id,
            id,
            os_name: self.os_name,
            os_version: self.os_version,
            client_name: self.client_name,
            client_version: self.client_version,
            client_type: self.client_type,
            device_type: self.device_type,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_MAC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
         AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    #[test]
    fn chrome_on_macos() {
        let fp = Fingerprint::parse(CHROME_MAC);

        assert_eq!(fp.os_name, "macOS");
        assert_eq!(fp.os_version, "10.15.7");
        assert_eq!(fp.client_name, "Chrome");
        assert_eq!(fp.client_version, "120.0.0.0");
        assert_eq!(fp.device_type, "desktop");
    }

    #[test]
    fn edge_is_not_reported_as_chrome() {
        let ua = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.2210.91";
        let fp = Fingerprint::parse(ua);

        assert_eq!(fp.client_name, "Edge");
        assert_eq!(fp.os_name, "Windows");
        assert_eq!(fp.os_version, "10.0");
    }

    #[test]
    fn safari_requires_the_version_token() {
        let ua = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
             (KHTML, like Gecko) Version/17.1 Safari/605.1.15";
        let fp = Fingerprint::parse(ua);

        assert_eq!(fp.client_name, "Safari");
        assert_eq!(fp.client_version, "17.1");
    }

    #[test]
    fn ios_chrome_normalizes_to_chrome() {
        let ua = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) AppleWebKit/605.1.15 \
             (KHTML, like Gecko) CriOS/120.0.6099.119 Mobile/15E148 Safari/604.1";
        let fp = Fingerprint::parse(ua);

        assert_eq!(fp.client_name, "Chrome");
        assert_eq!(fp.os_name, "iOS");
        assert_eq!(fp.os_version, "17.1");
        assert_eq!(fp.device_type, "mobile");
    }

    #[test]
    fn android_tablet_beats_mobile() {
        let ua = "Mozilla/5.0 (Linux; Android 13; SM-X906C) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/112.0.0.0 Safari/537.36 Tablet";
        let fp = Fingerprint::parse(ua);

        assert_eq!(fp.os_name, "Android");
        assert_eq!(fp.device_type, "tablet");
    }

    #[test]
    fn garbage_parses_to_unknowns() {
        let fp = Fingerprint::parse("curl/8.4.0");

        assert_eq!(fp.os_name, UNKNOWN);
        assert_eq!(fp.client_name, UNKNOWN);
        assert_eq!(fp.device_type, "desktop");
        assert_eq!(fp.signature(), "unknown:unknown:unknown:unknown:browser:desktop");
    }

    #[test]
    fn same_signature_same_device_id() {
        let project = uuid::Uuid::new_v4();
        let a = Fingerprint::parse(CHROME_MAC).into_device_row(project, UserId(9), Utc::now());
        let b = Fingerprint::parse(CHROME_MAC).into_device_row(project, UserId(9), Utc::now());

        assert_eq!(a.id, b.id);
    }
}
