use crate::api::ImageOptions;
use crate::cli::CredentialArgs;
use crate::config::{Config, ENV_TOKEN_ID, ENV_TOKEN_SECRET};
use crate::render::{Renderer, TerminalRenderer};
use crate::session::AuthorizationMode;
use crate::signing::Identity;
use crate::workflow::ImageMaker;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

pub fn expand_tilde_path(path: &Path) -> std::path::PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

/// Token ID from the flag/environment, then the config file.
pub fn resolve_token_id(credentials: &CredentialArgs, config: &Config) -> Result<String> {
    credentials
        .token
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| config.token_id.clone())
        .with_context(|| {
            format!(
                "No token ID given. Use --token, set {ENV_TOKEN_ID}, or run 'nim config set token_id <id>'"
            )
        })
}

pub fn resolve_identity(credentials: &CredentialArgs, config: &Config) -> Result<Identity> {
    let token_id = resolve_token_id(credentials, config)?;
    let secret = credentials
        .secret
        .clone()
        .with_context(|| format!("No token secret given. Use --secret or set {ENV_TOKEN_SECRET}"))?;
    Ok(Identity::new(token_id, secret)?)
}

pub fn resolve_mode(credentials: &CredentialArgs, config: &Config) -> AuthorizationMode {
    credentials.mode.unwrap_or(config.authorization_mode)
}

pub fn load_image_options(path: &Path) -> Result<ImageOptions> {
    let path = expand_tilde_path(path);
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read image options {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse image options {}", path.display()))
}

/// Load config, build an [`ImageMaker`] and authorize it.
pub async fn authorized_image_maker(
    credentials: &CredentialArgs,
    verbose: bool,
    renderer: Option<Arc<dyn Renderer>>,
) -> Result<(Config, ImageMaker)> {
    let config = Config::load()?;
    let identity = resolve_identity(credentials, &config)?;
    let mode = resolve_mode(credentials, &config);

    let renderer = renderer.unwrap_or_else(|| Arc::new(TerminalRenderer::new(verbose)));
    let maker = ImageMaker::new(&config, renderer)?;
    maker
        .authorize(&identity, mode)
        .await
        .context("Unable to authorize with the image maker")?;

    Ok((config, maker))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(token: Option<&str>, secret: Option<&str>) -> CredentialArgs {
        CredentialArgs {
            token: token.map(str::to_string),
            secret: secret.map(str::to_string),
            mode: None,
        }
    }

    #[test]
    fn test_token_id_falls_back_to_config() {
        let config = Config {
            token_id: Some("from-config".to_string()),
            ..Default::default()
        };

        assert_eq!(
            resolve_token_id(&credentials(Some("from-flag"), None), &config).unwrap(),
            "from-flag"
        );
        assert_eq!(
            resolve_token_id(&credentials(None, None), &config).unwrap(),
            "from-config"
        );
        assert!(resolve_token_id(&credentials(None, None), &Config::default()).is_err());
    }

    #[test]
    fn test_identity_requires_secret() {
        let config = Config::default();
        assert!(resolve_identity(&credentials(Some("tok"), None), &config).is_err());
        assert!(resolve_identity(&credentials(Some("tok"), Some(" ")), &config).is_err());
        assert!(resolve_identity(&credentials(Some("tok"), Some("s3cret")), &config).is_ok());
    }

    #[test]
    fn test_mode_flag_overrides_config() {
        let config = Config {
            authorization_mode: AuthorizationMode::ImageServiceDelegated,
            ..Default::default()
        };
        let mut args = credentials(None, None);
        assert_eq!(
            resolve_mode(&args, &config),
            AuthorizationMode::ImageServiceDelegated
        );
        args.mode = Some(AuthorizationMode::SolarNetwork);
        assert_eq!(resolve_mode(&args, &config), AuthorizationMode::SolarNetwork);
    }

    #[test]
    fn test_load_image_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        std::fs::write(
            &path,
            r#"{"environment":{"SN_NODE_ID":"42"},"parameters":{"hostname":"node42"}}"#,
        )
        .unwrap();

        let options = load_image_options(&path).unwrap();
        assert_eq!(options.environment.get("SN_NODE_ID").map(String::as_str), Some("42"));
        assert!(!options.verbose);

        std::fs::write(&path, "not json").unwrap();
        assert!(load_image_options(&path).is_err());
    }
}
