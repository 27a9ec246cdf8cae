//! Presentation hooks. The workflow calls these with plain data and never
//! depends on how (or whether) anything is drawn.

use crate::api::Receipt;
use crate::catalog::ImageGroup;
use crate::types::{ByteSize, Percent};
use crate::ui;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultAction {
    Authorize,
    Submit,
}

pub trait Renderer: Send + Sync {
    fn render_catalog(&self, groups: &[ImageGroup]);

    fn render_receipt(&self, receipt: &Receipt);

    fn render_upload_progress(&self, fraction: f64);

    fn toggle_result(&self, action: ResultAction, success: bool);

    /// Show `Some(message)` as an alert, or clear it with `None`.
    fn show_alert(&self, message: Option<&str>);
}

pub struct NoopRenderer;

impl Renderer for NoopRenderer {
    fn render_catalog(&self, _groups: &[ImageGroup]) {}

    fn render_receipt(&self, _receipt: &Receipt) {}

    fn render_upload_progress(&self, _fraction: f64) {}

    fn toggle_result(&self, _action: ResultAction, _success: bool) {}

    fn show_alert(&self, _message: Option<&str>) {}
}

/// Renders to the terminal through `ui`.
pub struct TerminalRenderer {
    verbose: bool,
}

impl TerminalRenderer {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    fn render_group(&self, group: &ImageGroup, depth: usize) {
        let indent = "  ".repeat(depth);
        ui::info(&format!("{indent}+ {}", group.component_name));

        for child in &group.groups {
            self.render_group(child, depth + 1);
        }

        for item in &group.items {
            let mut line = format!("{indent}  - {}", group.display_name_for(item));
            if self.verbose {
                line.push_str(&format!("  [{}]", item.id));
                if let Some(size) = item.content_length() {
                    line.push_str(&format!(" {}", ByteSize::new(size)));
                }
            }
            ui::info(&line);
        }
    }
}

impl Renderer for TerminalRenderer {
    fn render_catalog(&self, groups: &[ImageGroup]) {
        if groups.is_empty() {
            ui::info("No base images available");
            return;
        }
        for group in groups {
            self.render_group(group, 0);
        }
    }

    fn render_receipt(&self, receipt: &Receipt) {
        let mut line = format!(
            "[{}] {} {} {}",
            receipt.id,
            receipt.base_image_id,
            Percent(receipt.progress()),
            receipt.message
        );
        if receipt.done {
            line.push_str(" (done)");
        }
        ui::info(line.trim_end());
    }

    fn render_upload_progress(&self, fraction: f64) {
        ui::progress_line(&format!("Uploading... {}", Percent(fraction)), fraction >= 1.0);
    }

    fn toggle_result(&self, action: ResultAction, success: bool) {
        match (action, success) {
            (ResultAction::Authorize, true) => ui::info("Authorized image session"),
            (ResultAction::Authorize, false) => ui::error("Authorization failed"),
            (ResultAction::Submit, true) => ui::info("Image submitted"),
            (ResultAction::Submit, false) => ui::error("Image submission failed"),
        }
    }

    fn show_alert(&self, message: Option<&str>) {
        if let Some(message) = message {
            ui::error(message);
        }
    }
}
