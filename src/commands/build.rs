use crate::cli::CredentialArgs;
use crate::commands::utils::{authorized_image_maker, expand_tilde_path, load_image_options};
use crate::error::NimError;
use crate::submission::{UploadFile, UploadTask};
use crate::types::ByteSize;
use crate::ui;
use anyhow::{Context, Result};
use std::path::PathBuf;

pub struct BuildArgs {
    pub image: String,
    pub files: Vec<PathBuf>,
    pub options: Option<PathBuf>,
    pub no_wait: bool,
    pub output: Option<PathBuf>,
}

pub async fn execute(credentials: CredentialArgs, args: BuildArgs, verbose: bool) -> Result<()> {
    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        files.push(UploadFile::read(&expand_tilde_path(path)).await?);
    }
    let options = args
        .options
        .as_deref()
        .map(load_image_options)
        .transpose()?;

    let (config, maker) = authorized_image_maker(&credentials, verbose, None).await?;

    if verbose {
        ui::info("Fetching base images...");
    }
    maker.catalog().list_base_images().await?;
    maker.select(&args.image).map_err(|err| match err {
        NimError::NoImageSelected => anyhow::anyhow!(
            "Base image '{}' not found. Run 'nim images' to list available images",
            args.image
        ),
        other => other.into(),
    })?;

    let mut task = UploadTask::new(args.image.clone(), files);
    if let Some(options) = options {
        task = task.with_options(options);
    }
    ui::info(&format!(
        "Uploading {} ({}) for {}",
        ui::plural(task.files.len(), "file", "files"),
        ByteSize::new(task.total_bytes()),
        args.image
    ));

    let receipt = maker.submit(task).await?;

    if args.no_wait {
        ui::build_summary(&receipt.id, &receipt.base_image_id, None);
        return Ok(());
    }

    ui::info(&format!(
        "Waiting for image {} (refreshing every {}s)...",
        receipt.id,
        config.refresh_interval().as_secs_f64()
    ));
    let done = maker
        .wait_until_done(&receipt.id)
        .await
        .with_context(|| format!("Lost track of image {}", receipt.id))?;
    let url = maker.resolved_download_url(&done.id);

    if let Some(output) = args.output {
        let output = expand_tilde_path(&output);
        let bytes = maker.download(&done, &output).await?;
        ui::info(&format!(
            "Saved {} to {}",
            ByteSize::new(bytes),
            output.display()
        ));
    }

    ui::build_summary(&done.id, &done.base_image_id, url.as_deref());
    Ok(())
}
