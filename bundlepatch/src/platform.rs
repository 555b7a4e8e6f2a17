//! Target platforms and their canonical names.
//!
//! The platform name selects the version published for that platform on
//! the patch endpoint (`patch?platform=<name>`) and keys the release version
//! index.

use std::fmt;
use std::str::FromStr;

/// Platforms a release can be published for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Android,
    Ios,
    WebPlayer,
    Windows,
    MacOs,
}

impl Platform {
    /// All platforms, in index order.
    pub const ALL: [Platform; 5] = [
        Platform::Android,
        Platform::Ios,
        Platform::WebPlayer,
        Platform::Windows,
        Platform::MacOs,
    ];

    /// Canonical name used on the wire and in the version index.
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Android => "Android",
            Platform::Ios => "iOS",
            Platform::WebPlayer => "WebPlayer",
            Platform::Windows => "Windows",
            Platform::MacOs => "OSX",
        }
    }

    /// Platform of the running host, if it is one we publish for.
    pub fn current() -> Option<Platform> {
        match std::env::consts::OS {
            "windows" => Some(Platform::Windows),
            "macos" => Some(Platform::MacOs),
            "android" => Some(Platform::Android),
            "ios" => Some(Platform::Ios),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = String;

    /// Parse a platform name. Accepts canonical names and a few common aliases,
    /// case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" | "iphone" => Ok(Platform::Ios),
            "webplayer" | "webgl" => Ok(Platform::WebPlayer),
            "windows" | "win" | "win64" => Ok(Platform::Windows),
            "osx" | "macos" | "mac" => Ok(Platform::MacOs),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip_through_from_str() {
        for platform in Platform::ALL {
            assert_eq!(platform.name().parse::<Platform>().unwrap(), platform);
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!("macos".parse::<Platform>().unwrap(), Platform::MacOs);
        assert_eq!("WIN64".parse::<Platform>().unwrap(), Platform::Windows);
        assert!("amiga".parse::<Platform>().is_err());
    }

    #[test]
    fn test_display_uses_wire_name() {
        assert_eq!(Platform::MacOs.to_string(), "OSX");
        assert_eq!(Platform::Ios.to_string(), "iOS");
    }
}
