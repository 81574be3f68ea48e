use serde::{Deserialize, Serialize};

/// Coarse user-agent breakdown attached to `context.userAgentInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAgentInfo {
    pub browser: String,
    pub os: String,
    pub device_type: DeviceType,
    pub bot: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    Unknown,
}

impl UserAgentInfo {
    pub fn parse(user_agent: &str) -> Self {
        let ua = user_agent.to_lowercase();
        Self {
            browser: detect_browser(&ua).to_string(),
            os: detect_os(&ua).to_string(),
            device_type: detect_device_type(&ua),
            bot: detect_bot(&ua),
        }
    }
}

// Order matters: Edge and Opera contain "chrome/", Chrome contains "safari/".
fn detect_browser(ua: &str) -> &'static str {
    if ua.contains("edg/") || ua.contains("edge/") {
        "Edge"
    } else if ua.contains("opr/") || ua.contains("opera") {
        "Opera"
    } else if ua.contains("samsungbrowser/") {
        "Samsung Internet"
    } else if ua.contains("chrome/") || ua.contains("crios/") {
        "Chrome"
    } else if ua.contains("firefox/") || ua.contains("fxios/") {
        "Firefox"
    } else if ua.contains("safari/") {
        "Safari"
    } else if ua.contains("msie") || ua.contains("trident/") {
        "Internet Explorer"
    } else {
        "Unknown"
    }
}

// iOS agents also mention "mac os x", so mobile platforms are checked first.
fn detect_os(ua: &str) -> &'static str {
    if ua.contains("iphone") || ua.contains("ipod") {
        "iOS"
    } else if ua.contains("ipad") {
        "iPadOS"
    } else if ua.contains("android") {
        "Android"
    } else if ua.contains("windows") {
        "Windows"
    } else if ua.contains("mac os x") || ua.contains("macintosh") {
        "macOS"
    } else if ua.contains("cros") {
        "Chrome OS"
    } else if ua.contains("linux") {
        "Linux"
    } else {
        "Unknown"
    }
}

fn detect_device_type(ua: &str) -> DeviceType {
    if ua.contains("ipad") || ua.contains("tablet") {
        DeviceType::Tablet
    } else if ua.contains("mobile") || ua.contains("iphone") || ua.contains("android") {
        DeviceType::Mobile
    } else if ua.contains("windows")
        || ua.contains("macintosh")
        || ua.contains("linux")
        || ua.contains("cros")
    {
        DeviceType::Desktop
    } else {
        DeviceType::Unknown
    }
}

const BOT_MARKERS: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "slurp",
    "headless",
    "lighthouse",
    "curl/",
    "wget/",
];

fn detect_bot(ua: &str) -> bool {
    BOT_MARKERS.iter().any(|marker| ua.contains(marker))
}
