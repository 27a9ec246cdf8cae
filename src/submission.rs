use crate::api::{self, ImageOptions, NimClient, Receipt, ResponseError};
use crate::catalog::ImageCatalog;
use crate::error::NimError;
use crate::progress::UploadProgress;
use crate::render::Renderer;
use crate::tracker::ReceiptTracker;
use crate::types::{ByteSize, NimResult};
use log::{debug, info};
use reqwest::multipart::{Form, Part};
use reqwest::Body;
use std::path::Path;
use std::sync::Arc;

const DATA_FILE_PART: &str = "dataFile";
const OPTIONS_PART: &str = "options";
const OPTIONS_FILE_NAME: &str = "options.json";
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// A named file to add to the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub content: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Read `path` into memory, named after its final component.
    pub async fn read(path: &Path) -> NimResult<Self> {
        let content = tokio::fs::read(path)
            .await
            .map_err(|e| NimError::IoError(format!("{}: {}", path.display(), e)))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, content })
    }

    pub fn len(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// One submission: the base image and the files to customize it with.
#[derive(Debug, Clone, Default)]
pub struct UploadTask {
    pub image_id: String,
    pub files: Vec<UploadFile>,
    pub options: Option<ImageOptions>,
}

impl UploadTask {
    pub fn new(image_id: impl Into<String>, files: Vec<UploadFile>) -> Self {
        Self {
            image_id: image_id.into(),
            files,
            options: None,
        }
    }

    pub fn with_options(mut self, options: ImageOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(UploadFile::len).sum()
    }
}

pub struct SubmissionWorkflow {
    client: NimClient,
    catalog: Arc<ImageCatalog>,
    tracker: Arc<ReceiptTracker>,
    renderer: Arc<dyn Renderer>,
}

impl SubmissionWorkflow {
    pub fn new(
        client: NimClient,
        catalog: Arc<ImageCatalog>,
        tracker: Arc<ReceiptTracker>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            client,
            catalog,
            tracker,
            renderer,
        }
    }

    /// Upload `task` against the selected base image. On success the returned
    /// receipt is already registered with the tracker.
    pub async fn submit(&self, task: UploadTask) -> NimResult<Receipt> {
        let image = self
            .catalog
            .selected()
            .filter(|image| !task.image_id.is_empty() && image.has_id(&task.image_id))
            .ok_or(NimError::NoImageSelected)?;

        let url = self
            .client
            .session_url(&api::create_image_endpoint(&image.id))
            .await?;

        let total_bytes = task.total_bytes();
        info!(
            "Submitting {} file(s) ({}) for base image {}",
            task.files.len(),
            ByteSize::new(total_bytes),
            image.id
        );

        let progress = UploadProgress::new(self.renderer.clone(), total_bytes);
        let form = build_form(task, &progress)?;

        debug!("POST {}", url);
        let request = self
            .client
            .http()
            .post(url.as_str())
            .header("Accept", "application/json")
            .multipart(form);

        let response = self.client.send(request).await.map_err(upload_failed)?;
        let receipt: Receipt = NimClient::decode_envelope(response)
            .await
            .map_err(upload_failed)?;

        info!("Image {} submitted as receipt {}", image.id, receipt.id);
        self.tracker.register(receipt.clone());
        Ok(receipt)
    }
}

fn build_form(task: UploadTask, progress: &UploadProgress) -> NimResult<Form> {
    let mut form = Form::new();

    for file in task.files {
        let length = file.len();
        let progress = progress.clone();
        let chunks: Vec<Vec<u8>> = file
            .content
            .chunks(UPLOAD_CHUNK_SIZE)
            .map(<[u8]>::to_vec)
            .collect();
        let stream = futures_util::stream::iter(chunks.into_iter().map(move |chunk| {
            progress.record_bytes(chunk.len() as u64);
            Ok::<_, std::io::Error>(chunk)
        }));

        let part = Part::stream_with_length(Body::wrap_stream(stream), length).file_name(file.name);
        form = form.part(DATA_FILE_PART, part);
    }

    if let Some(options) = task.options {
        let json = serde_json::to_vec(&options).map_err(|e| NimError::UploadFailed {
            status: 0,
            body: format!("Invalid image options: {e}"),
        })?;
        let part = Part::bytes(json)
            .file_name(OPTIONS_FILE_NAME)
            .mime_str("application/json")
            .map_err(|e| NimError::UploadFailed {
                status: 0,
                body: e.to_string(),
            })?;
        form = form.part(OPTIONS_PART, part);
    }

    Ok(form)
}

fn upload_failed(err: ResponseError) -> NimError {
    NimError::UploadFailed {
        status: err.status(),
        body: err.body(),
    }
}
