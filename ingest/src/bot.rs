use axum::http::HeaderMap;
use once_cell::sync::Lazy;
use regex::Regex;

// Known crawler tokens plus a few fixed agents that hammer endpoints
// without ever being a person. Case-insensitive substring match.
static BOT_SIGNATURE: Lazy<Regex> = Lazy::new(|| {
    let tokens = [
        r"bot\b",
        "bot/",
        "crawler",
        "crawling",
        "spider",
        "slurp",
        "headless",
        "lighthouse",
        "phantomjs",
        "pingdom",
        "facebookexternalhit",
        "whatsapp",
        "telegrambot",
        "bingpreview",
        "vkshare",
        "mediapartners",
    ];
    Regex::new(&format!("(?i){}", tokens.join("|"))).expect("bot signature regex must compile")
});

// Browsers mark speculative loads with a purpose header; those requests
// are not user activity.
const PURPOSE_HEADERS: [&str; 3] = ["sec-purpose", "purpose", "x-purpose"];

/// Whether this request is automated or speculative traffic that must not
/// consume identity or session state.
pub fn is_bot(headers: &HeaderMap, user_agent: Option<&str>) -> bool {
    if let Some(ua) = user_agent {
        if BOT_SIGNATURE.is_match(ua) {
            return true;
        }
    }

    PURPOSE_HEADERS.iter().any(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("prefetch") || v.contains("preview"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crawlers_are_bots() {
        let headers = HeaderMap::new();

        for ua in [
            "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
            "Mozilla/5.0 (compatible; bingbot/2.0)",
            "Screaming Frog SEO Spider/19.0",
            "Mozilla/5.0 HeadlessChrome/120.0.0.0",
        ] {
            assert!(is_bot(&headers, Some(ua)), "{ua} should be a bot");
        }
    }

    #[test]
    fn prefetch_requests_are_bots() {
        let mut headers = HeaderMap::new();
        headers.insert("sec-purpose", "prefetch;prerender".parse().unwrap());

        assert!(is_bot(&headers, Some("Mozilla/5.0 (Macintosh) Chrome/120.0")));
    }

    #[test]
    fn a_regular_browser_is_not() {
        let headers = HeaderMap::new();
        let ua = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) Chrome/120.0.0.0 Safari/537.36";

        assert!(!is_bot(&headers, Some(ua)));
        assert!(!is_bot(&headers, None));
    }
}
