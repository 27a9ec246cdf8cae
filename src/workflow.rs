use crate::api::{ImageInfo, NimClient, Receipt, SessionKey};
use crate::catalog::{ImageCatalog, ImageGroup};
use crate::config::Config;
use crate::render::{Renderer, ResultAction};
use crate::session::{AuthorizationMode, AuthorizationSession, AuthorizationState};
use crate::signing::Identity;
use crate::submission::{SubmissionWorkflow, UploadTask};
use crate::tracker::ReceiptTracker;
use crate::types::{NimResult, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Owns one image maker session: authorization, the catalog and selection,
/// submissions and the receipts they produce. Every component shares the same
/// client and therefore the same session key.
pub struct ImageMaker {
    client: NimClient,
    session: AuthorizationSession,
    catalog: Arc<ImageCatalog>,
    tracker: Arc<ReceiptTracker>,
    submission: SubmissionWorkflow,
    renderer: Arc<dyn Renderer>,
}

impl ImageMaker {
    pub fn new(config: &Config, renderer: Arc<dyn Renderer>) -> Result<Self> {
        let client = NimClient::from_config(config)?;
        Ok(Self::with_client(client, renderer, config.refresh_interval()))
    }

    pub fn with_client(
        client: NimClient,
        renderer: Arc<dyn Renderer>,
        refresh_interval: Duration,
    ) -> Self {
        let session = AuthorizationSession::new(client.clone());
        let catalog = Arc::new(ImageCatalog::new(client.clone()));
        let tracker = Arc::new(ReceiptTracker::new(
            client.clone(),
            renderer.clone(),
            refresh_interval,
        ));
        let submission = SubmissionWorkflow::new(
            client.clone(),
            catalog.clone(),
            tracker.clone(),
            renderer.clone(),
        );

        Self {
            client,
            session,
            catalog,
            tracker,
            submission,
            renderer,
        }
    }

    pub fn client(&self) -> &NimClient {
        &self.client
    }

    pub fn catalog(&self) -> &ImageCatalog {
        &self.catalog
    }

    pub fn tracker(&self) -> &ReceiptTracker {
        &self.tracker
    }

    pub fn authorization_state(&self) -> AuthorizationState {
        self.session.state()
    }

    pub async fn authorize(
        &self,
        identity: &Identity,
        mode: AuthorizationMode,
    ) -> NimResult<SessionKey> {
        self.renderer.show_alert(None);
        let result = self.session.authorize(identity, mode).await;
        self.report(ResultAction::Authorize, &result);
        result
    }

    pub async fn sign_out(&self) {
        self.session.sign_out().await;
        self.catalog.clear_selection();
    }

    pub async fn list_base_images(&self) -> NimResult<Vec<ImageGroup>> {
        let result = self.catalog.list_base_images().await;
        match &result {
            Ok(groups) => self.renderer.render_catalog(groups),
            Err(err) => self.renderer.show_alert(Some(&err.to_string())),
        }
        result
    }

    pub fn select(&self, image_id: &str) -> NimResult<ImageInfo> {
        self.catalog.select(image_id)
    }

    pub fn selected(&self) -> Option<ImageInfo> {
        self.catalog.selected()
    }

    pub async fn submit(&self, task: UploadTask) -> NimResult<Receipt> {
        self.renderer.show_alert(None);
        let result = self.submission.submit(task).await;
        self.report(ResultAction::Submit, &result);
        result
    }

    pub fn receipts(&self) -> Vec<Receipt> {
        self.tracker.receipts()
    }

    pub async fn wait_until_done(&self, receipt_id: &str) -> NimResult<Receipt> {
        self.tracker.wait_until_done(receipt_id).await
    }

    /// Download URL of a receipt that `wait_until_done` has seen finish.
    pub fn resolved_download_url(&self, receipt_id: &str) -> Option<String> {
        self.tracker.resolved_download_url(receipt_id)
    }

    pub async fn download(&self, receipt: &Receipt, dest: &Path) -> NimResult<u64> {
        self.tracker.download(receipt, dest).await
    }

    fn report<T>(&self, action: ResultAction, result: &NimResult<T>) {
        self.renderer.toggle_result(action, result.is_ok());
        if let Err(err) = result {
            self.renderer.show_alert(Some(&err.to_string()));
        }
    }
}
