//! Seed target resolution

use url::Url;

use crate::error::{Result, TargetError};

/// The fixed origin under test.
///
/// Derived once from the seed argument and never changed afterwards. The
/// scope root is always `/`, no matter what path the seed carried: scope is
/// granted to the whole origin, not to a subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Target {
    /// Resolve a user-supplied host or URL string into the target origin
    /// plus the normalized seed URL the crawl starts from.
    ///
    /// A bare hostname gets an `http://` scheme, a missing port becomes the
    /// scheme's default, and an empty path becomes `/`.
    pub fn resolve(input: &str) -> Result<(Target, Url)> {
        let candidate = if input.contains("://") {
            input.to_string()
        } else {
            format!("http://{input}")
        };

        let mut seed = Url::parse(&candidate).map_err(|e| TargetError::Malformed {
            input: input.to_string(),
            reason: e.to_string(),
        })?;

        let host = seed
            .host_str()
            .ok_or_else(|| TargetError::MissingHost(input.to_string()))?
            .to_string();

        let port = seed
            .port_or_known_default()
            .ok_or_else(|| TargetError::UnknownScheme(seed.scheme().to_string()))?;

        if seed.path().is_empty() {
            seed.set_path("/");
        }

        let target = Target {
            scheme: seed.scheme().to_string(),
            host,
            port,
        };
        Ok((target, seed))
    }

    /// `scheme://host:port` origin string, the form scope operations take.
    pub fn origin(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// The scope root URL (always path `/`).
    pub fn scope_root(&self) -> String {
        format!("{}/", self.origin())
    }

    pub fn is_https(&self) -> bool {
        self.scheme == "https"
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.origin())
    }
}
