//! Auth token resolution.
//!
//! The acceptance rule: `Required` reads the cached token and fails when
//! none exists, `Disabled` never sends one, `Explicit` uses the given
//! string as-is, and `Implicit` sends the cached token unless the
//! disable-implicit-token flag is set.

use std::path::Path;

use crate::config::{HubConfig, ENV_TOKEN, ENV_TOKEN_LEGACY};
use crate::error::{HubError, Result};

/// How a call wants authentication handled.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TokenPolicy {
    /// Read the cached token; error if none is found.
    Required,
    /// Never send a token.
    Disabled,
    /// Use this token verbatim.
    Explicit(String),
    /// Send the cached token when available, unless implicitly disabled.
    #[default]
    Implicit,
}

impl TokenPolicy {
    /// Resolves the policy against the environment and token file.
    pub fn resolve(&self, config: &HubConfig) -> Result<Option<String>> {
        match self {
            TokenPolicy::Disabled => Ok(None),
            TokenPolicy::Explicit(token) => Ok(Some(token.clone())),
            TokenPolicy::Required => match cached_token(config) {
                Some(token) => Ok(Some(token)),
                None => Err(HubError::LocalTokenNotFound(format!(
                    "no token in {} or {} and no file at {}",
                    ENV_TOKEN,
                    ENV_TOKEN_LEGACY,
                    config.token_path.display()
                ))),
            },
            TokenPolicy::Implicit => {
                if config.disable_implicit_token {
                    Ok(None)
                } else {
                    Ok(cached_token(config))
                }
            }
        }
    }
}

/// Returns the cached token: environment first, then the token file.
pub fn cached_token(config: &HubConfig) -> Option<String> {
    env_token(ENV_TOKEN)
        .or_else(|| env_token(ENV_TOKEN_LEGACY))
        .or_else(|| token_from_file(&config.token_path))
}

fn env_token(name: &str) -> Option<String> {
    let value = std::env::var(name).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn token_from_file(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_with_token_path(path: &Path) -> HubConfig {
        HubConfig {
            token_path: path.to_path_buf(),
            ..HubConfig::default()
        }
    }

    #[test]
    fn test_disabled_never_sends() {
        let config = HubConfig::default();
        assert_eq!(TokenPolicy::Disabled.resolve(&config).unwrap(), None);
    }

    #[test]
    fn test_explicit_used_verbatim() {
        let config = HubConfig::default();
        let policy = TokenPolicy::Explicit("hf_secret".to_string());
        assert_eq!(
            policy.resolve(&config).unwrap(),
            Some("hf_secret".to_string())
        );
    }

    #[test]
    fn test_token_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token");
        let mut file = std::fs::File::create(&token_path).unwrap();
        writeln!(file, "  hf_filetoken  ").unwrap();

        assert_eq!(
            token_from_file(&token_path),
            Some("hf_filetoken".to_string())
        );
    }

    #[test]
    fn test_empty_token_file_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "   \n").unwrap();
        assert_eq!(token_from_file(&token_path), None);
    }

    #[test]
    fn test_required_errors_without_token() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_token_path(&dir.path().join("missing"));
        // Only meaningful when the environment carries no token.
        if std::env::var(ENV_TOKEN).is_err() && std::env::var(ENV_TOKEN_LEGACY).is_err() {
            let err = TokenPolicy::Required.resolve(&config).unwrap_err();
            assert!(matches!(err, HubError::LocalTokenNotFound(_)));
        }
    }

    #[test]
    fn test_implicit_respects_disable_flag() {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "hf_filetoken").unwrap();

        let mut config = config_with_token_path(&token_path);
        config.disable_implicit_token = true;
        assert_eq!(TokenPolicy::Implicit.resolve(&config).unwrap(), None);
    }
}
