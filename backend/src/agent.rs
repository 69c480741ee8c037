//! User-Agent parsing into a [`DeviceDescriptor`].

use crate::models::DeviceDescriptor;

/// Turns a raw `User-Agent` header into device metadata.
pub trait AgentParser: Send + Sync {
    fn parse(&self, user_agent: &str) -> DeviceDescriptor;
}

/// Token-matching parser covering the common browsers, HTTP clients and
/// operating systems. Anything unrecognised maps to an empty string.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicAgentParser;

// Order matters: Edge and Opera also advertise Chrome, Chrome advertises Safari.
const CLIENTS: &[(&str, &str)] = &[
    ("Edg/", "Edge"),
    ("OPR/", "Opera"),
    ("Firefox/", "Firefox"),
    ("Chrome/", "Chrome"),
    ("CriOS/", "Chrome"),
    ("Safari/", "Safari"),
    ("okhttp/", "okhttp"),
    ("Dart/", "Dart"),
    ("curl/", "curl"),
];

const SYSTEMS: &[(&str, &str)] = &[
    ("Windows", "Windows"),
    ("iPhone", "iOS"),
    ("iPad", "iOS"),
    ("Android", "Android"),
    ("Mac OS X", "macOS"),
    ("Macintosh", "macOS"),
    ("CrOS", "ChromeOS"),
    ("Linux", "Linux"),
];

impl BasicAgentParser {
    fn client_name(ua: &str) -> &'static str {
        CLIENTS
            .iter()
            .find(|(token, _)| ua.contains(token))
            .map(|(_, name)| *name)
            .unwrap_or("")
    }

    fn os(ua: &str) -> &'static str {
        SYSTEMS
            .iter()
            .find(|(token, _)| ua.contains(token))
            .map(|(_, name)| *name)
            .unwrap_or("")
    }

    fn device(ua: &str, os: &str) -> &'static str {
        let lower = ua.to_ascii_lowercase();
        if lower.contains("bot") || lower.contains("spider") || lower.contains("crawl") {
            "Bot"
        } else if ua.contains("iPad") || ua.contains("Tablet") {
            "Tablet"
        } else if ua.contains("Mobile") || ua.contains("iPhone") || os == "Android" {
            "Mobile"
        } else if matches!(os, "Windows" | "macOS" | "Linux" | "ChromeOS") {
            "Desktop"
        } else {
            ""
        }
    }
}

impl AgentParser for BasicAgentParser {
    fn parse(&self, user_agent: &str) -> DeviceDescriptor {
        let os = Self::os(user_agent);
        DeviceDescriptor {
            device: Self::device(user_agent, os).to_string(),
            os: os.to_string(),
            client_name: Self::client_name(user_agent).to_string(),
        }
    }
}
