use crate::cli::CredentialArgs;
use crate::commands::utils::authorized_image_maker;
use crate::render::{NoopRenderer, Renderer};
use crate::ui;
use anyhow::Result;
use std::sync::Arc;

pub async fn execute(credentials: CredentialArgs, json_output: bool, verbose: bool) -> Result<()> {
    let renderer: Option<Arc<dyn Renderer>> = if json_output {
        Some(Arc::new(NoopRenderer))
    } else {
        None
    };
    let (_, maker) = authorized_image_maker(&credentials, verbose, renderer).await?;

    let groups = maker.list_base_images().await?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }

    let count = maker.catalog().images().len();
    if count > 0 {
        ui::blank_line();
        ui::info(&format!("{} available", ui::plural(count, "base image", "base images")));
    }

    Ok(())
}
