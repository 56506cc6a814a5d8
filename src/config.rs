//! Tunables shared by every promise created through a [`Host`](crate::Host).
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `PROMISE_THEN_MAX_ADOPTION_DEPTH` | `usize` (> 0) | `max_adoption_depth` |

use crate::Error;

/// Environment variable name for the adoption limit.
pub const ENV_MAX_ADOPTION_DEPTH: &str = "PROMISE_THEN_MAX_ADOPTION_DEPTH";

/// Default number of nested adoption hops a single resolution may take.
pub const DEFAULT_MAX_ADOPTION_DEPTH: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// How many promises and thenables may adopt one another before a
    /// thenable's `then` is refused and the chain is rejected with
    /// [`Error::AdoptionDepthExceeded`].
    pub max_adoption_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_adoption_depth: DEFAULT_MAX_ADOPTION_DEPTH,
        }
    }
}

impl Config {
    pub fn with_max_adoption_depth(mut self, depth: usize) -> Self {
        self.max_adoption_depth = depth;
        self
    }

    /// Defaults overridden by whatever is set in the environment.
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();
        if let Ok(val) = std::env::var(ENV_MAX_ADOPTION_DEPTH) {
            config.max_adoption_depth = parse_depth(ENV_MAX_ADOPTION_DEPTH, &val)?;
        }
        Ok(config)
    }
}

fn parse_depth(key: &'static str, val: &str) -> Result<usize, Error> {
    let invalid = |reason: String| Error::InvalidConfig {
        key,
        value: val.to_owned(),
        reason,
    };
    match val.trim().parse::<usize>() {
        Ok(0) => Err(invalid("must be at least 1".into())),
        Ok(depth) => Ok(depth),
        Err(e) => Err(invalid(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_depth() {
        assert_eq!(Config::default().max_adoption_depth, DEFAULT_MAX_ADOPTION_DEPTH);
        assert_eq!(Config::default().with_max_adoption_depth(3).max_adoption_depth, 3);
    }

    #[test]
    fn test_parse_depth() {
        assert_eq!(parse_depth(ENV_MAX_ADOPTION_DEPTH, " 16 "), Ok(16));
        assert!(matches!(
            parse_depth(ENV_MAX_ADOPTION_DEPTH, "0"),
            Err(Error::InvalidConfig { .. })
        ));
        let err = parse_depth(ENV_MAX_ADOPTION_DEPTH, "lots").unwrap_err();
        assert!(err.to_string().starts_with("invalid value for PROMISE_THEN_MAX_ADOPTION_DEPTH"));
    }
}
