//! Core identifier types

use std::fmt;

/// RTP synchronization source identifier. Scopes one media flow from one
/// sender; not unique across time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ssrc(pub u32);

impl fmt::Display for Ssrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Ssrc {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Canonical stream identity carried in RTCP source description. Stable
/// across SSRC churn for the same logical stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CName(pub String);

impl CName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Media kind of an ingress flow and its decoded samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => f.write_str("video"),
            MediaKind::Audio => f.write_str("audio"),
        }
    }
}
