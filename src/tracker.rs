use crate::api::{self, NimClient, Receipt, ResponseError};
use crate::error::{describe_transport_error, NimError};
use crate::render::Renderer;
use crate::types::NimResult;
use futures_util::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(5000);

#[derive(Default)]
struct TrackerState {
    receipts: Vec<Receipt>,
    updates: HashMap<String, Arc<watch::Sender<Receipt>>>,
    tasks: HashMap<String, JoinHandle<()>>,
    stalled: HashMap<String, String>,
    download_urls: HashMap<String, String>,
}

struct Shared {
    client: NimClient,
    renderer: Arc<dyn Renderer>,
    interval: Duration,
    state: Mutex<TrackerState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Replace the receipt with the same id, never letting a finished receipt
    /// go back to unfinished. Returns the receipt as stored.
    fn store(&self, receipt: Receipt) -> Receipt {
        let mut state = self.lock();
        match state.receipts.iter_mut().find(|r| r.id == receipt.id) {
            Some(existing) if existing.done && !receipt.done => {
                debug!("Ignoring unfinished update for finished receipt {}", receipt.id);
                existing.clone()
            }
            Some(existing) => {
                *existing = receipt.clone();
                receipt
            }
            None => {
                state.receipts.push(receipt.clone());
                receipt
            }
        }
    }

    async fn fetch(&self, receipt_id: &str) -> NimResult<Receipt> {
        let url = self
            .client
            .session_url(&api::receipt_endpoint(receipt_id))
            .await?;
        self.client
            .get_data(&url)
            .await
            .map_err(|e| NimError::ReceiptFetchFailed(e.to_string()))
    }

    async fn download_url(&self, receipt: &Receipt) -> NimResult<String> {
        match receipt.download_url.as_deref() {
            Some(url) if !url.trim().is_empty() => {
                if url.starts_with('/') {
                    Ok(self.client.build_nim_url(url))
                } else {
                    Ok(url.to_string())
                }
            }
            _ => {
                let url = self
                    .client
                    .session_url(&api::download_endpoint(&receipt.id))
                    .await?;
                Ok(url.as_str().to_string())
            }
        }
    }

    /// Resolve and remember the download URL of a finished receipt.
    async fn finish(&self, receipt: &Receipt) {
        match self.download_url(receipt).await {
            Ok(url) => {
                info!("Image {} is ready for download", receipt.id);
                self.lock().download_urls.insert(receipt.id.clone(), url);
            }
            Err(err) => warn!("Unable to resolve download for {}: {}", receipt.id, err),
        }
    }
}

/// Polls in-flight receipts, one task per receipt, until each is done.
pub struct ReceiptTracker {
    shared: Arc<Shared>,
}

impl ReceiptTracker {
    pub fn new(client: NimClient, renderer: Arc<dyn Renderer>, interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                client,
                renderer,
                interval,
                state: Mutex::new(TrackerState::default()),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    /// Add a freshly submitted receipt to the active receipts and start
    /// tracking it.
    pub fn register(&self, receipt: Receipt) {
        let stored = self.shared.store(receipt);
        self.shared.renderer.render_receipt(&stored);
        self.track(stored);
    }

    /// Start polling `receipt`. Calling this again restarts its polling;
    /// callers already waiting on the receipt keep their subscription.
    pub fn track(&self, receipt: Receipt) {
        let receipt = self.shared.store(receipt);
        let id = receipt.id.clone();

        let (tx, previous) = {
            let mut state = self.shared.lock();
            state.stalled.remove(&id);
            let tx = state
                .updates
                .entry(id.clone())
                .or_insert_with(|| Arc::new(watch::channel(receipt.clone()).0))
                .clone();
            (tx, state.tasks.remove(&id))
        };
        if let Some(task) = previous {
            task.abort();
        }
        if !receipt.done {
            tx.send_replace(receipt.clone());
        }

        let shared = self.shared.clone();
        let receipt_id = id.clone();
        let task = tokio::spawn(async move {
            if receipt.done {
                shared.finish(&receipt).await;
                tx.send_replace(receipt);
                return;
            }
            poll(shared, receipt_id, tx).await;
        });

        self.shared.lock().tasks.insert(id, task);
    }

    pub fn receipts(&self) -> Vec<Receipt> {
        self.shared.lock().receipts.clone()
    }

    pub fn receipt(&self, id: &str) -> Option<Receipt> {
        self.shared
            .lock()
            .receipts
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// Receiver of every update to the receipt with `id`.
    pub fn subscribe(&self, id: &str) -> Option<watch::Receiver<Receipt>> {
        self.shared.lock().updates.get(id).map(|tx| tx.subscribe())
    }

    pub fn is_stalled(&self, id: &str) -> bool {
        self.shared.lock().stalled.contains_key(id)
    }

    /// Wait for the receipt with `id` to finish. Fails with
    /// `ReceiptFetchFailed` if tracking stalls first. Once this returns,
    /// `resolved_download_url` has the receipt's download URL.
    pub async fn wait_until_done(&self, id: &str) -> NimResult<Receipt> {
        let Some(mut rx) = self.subscribe(id) else {
            return Err(self.stopped(id, format!("Receipt {id} is not tracked")));
        };

        let result = rx.wait_for(|receipt| receipt.done).await.map(|r| r.clone());
        match result {
            Ok(receipt) => {
                if self.resolved_download_url(id).is_none() {
                    self.shared.finish(&receipt).await;
                }
                Ok(receipt)
            }
            Err(_) => Err(self.stopped(id, format!("Tracking of receipt {id} stopped"))),
        }
    }

    fn stopped(&self, id: &str, fallback: String) -> NimError {
        let detail = self.shared.lock().stalled.get(id).cloned();
        NimError::ReceiptFetchFailed(detail.unwrap_or(fallback))
    }

    /// The artifact location: the receipt's own `downloadUrl`, or the
    /// service's download endpoint for the receipt id.
    pub async fn download_url(&self, receipt: &Receipt) -> NimResult<String> {
        self.shared.download_url(receipt).await
    }

    /// Download URL resolved when tracking saw the receipt finish.
    pub fn resolved_download_url(&self, id: &str) -> Option<String> {
        self.shared.lock().download_urls.get(id).cloned()
    }

    /// Stream a finished image to `dest`, returning the number of bytes
    /// written.
    pub async fn download(&self, receipt: &Receipt, dest: &Path) -> NimResult<u64> {
        let url = match self.resolved_download_url(&receipt.id) {
            Some(url) => url,
            None => self.download_url(receipt).await?,
        };
        debug!("Downloading image {} to {}", receipt.id, dest.display());

        let response = self
            .shared
            .client
            .send(self.shared.client.http().get(&url))
            .await
            .map_err(|e| match e {
                ResponseError::Transport(message) => NimError::ConnectionError(message),
                other => NimError::DownloadFailed {
                    status: other.status(),
                    body: other.body(),
                },
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let mut body = response.text().await.unwrap_or_default();
            if let Some(retry_after) = retry_after {
                if body.is_empty() {
                    body = format!("retry after {retry_after}s");
                }
            }
            return Err(NimError::DownloadFailed {
                status: status.as_u16(),
                body,
            });
        }

        let written = match write_body(response, dest).await {
            Ok(written) => written,
            Err(err) => {
                if let Err(remove_err) = tokio::fs::remove_file(dest).await {
                    debug!("Could not remove partial {}: {}", dest.display(), remove_err);
                }
                return Err(err);
            }
        };

        info!("Downloaded {} bytes to {}", written, dest.display());
        Ok(written)
    }
}

async fn write_body(response: reqwest::Response, dest: &Path) -> NimResult<u64> {
    let mut file = tokio::fs::File::create(dest).await?;
    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| NimError::ConnectionError(describe_transport_error(&e)))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

impl Drop for ReceiptTracker {
    fn drop(&mut self) {
        for (_, task) in self.shared.lock().tasks.drain() {
            task.abort();
        }
    }
}

/// Fixed-interval polling of one receipt. Fetches are sequential; the loop
/// ends when the receipt is done or a fetch fails.
async fn poll(shared: Arc<Shared>, receipt_id: String, tx: Arc<watch::Sender<Receipt>>) {
    loop {
        tokio::time::sleep(shared.interval).await;

        match shared.fetch(&receipt_id).await {
            Ok(fresh) => {
                let receipt = shared.store(fresh);
                shared.renderer.render_receipt(&receipt);
                if receipt.done {
                    shared.finish(&receipt).await;
                    tx.send_replace(receipt);
                    return;
                }
                tx.send_replace(receipt);
            }
            Err(err) => {
                warn!("Stopped tracking receipt {}: {}", receipt_id, err);
                // Dropping the last sender wakes waiters with the stall.
                let mut state = shared.lock();
                state.stalled.insert(receipt_id.clone(), err.to_string());
                state.updates.remove(&receipt_id);
                return;
            }
        }
    }
}
