use crate::cli::CredentialArgs;
use crate::commands::utils::{resolve_identity, resolve_mode};
use crate::config::Config;
use crate::render::TerminalRenderer;
use crate::ui;
use crate::workflow::ImageMaker;
use anyhow::{Context, Result};
use std::sync::Arc;

pub async fn execute(credentials: CredentialArgs, save: bool, verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let identity = resolve_identity(&credentials, &config)?;
    let mode = resolve_mode(&credentials, &config);

    ui::info(&format!(
        "Requesting image session for token {} ({} authorization)...",
        identity.token_id(),
        mode.as_str()
    ));

    let maker = ImageMaker::new(&config, Arc::new(TerminalRenderer::new(verbose)))?;
    maker
        .authorize(&identity, mode)
        .await
        .context("Unable to authorize with the image maker")?;

    if save {
        let token_id = identity.token_id().to_string();
        Config::update(|saved| {
            saved.token_id = Some(token_id);
            saved.authorization_mode = mode;
            Ok(())
        })?;
        ui::info(&format!(
            "Token ID saved to {}",
            Config::config_path()?.display()
        ));
        ui::warn("The token secret is not saved; pass --secret or set NIM_TOKEN_SECRET");
    }

    Ok(())
}
