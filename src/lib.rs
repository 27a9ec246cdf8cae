pub mod api;
pub mod catalog;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod progress;
pub mod render;
pub mod session;
pub mod signing;
pub mod submission;
pub mod tracker;
pub mod types;
pub mod ui;
pub mod workflow;

pub use api::{ImageInfo, ImageOptions, NimClient, Receipt, SessionKey};
pub use catalog::{ImageCatalog, ImageGroup};
pub use error::NimError;
pub use render::{NoopRenderer, Renderer, ResultAction, TerminalRenderer};
pub use session::{AuthorizationMode, AuthorizationSession, AuthorizationState};
pub use signing::Identity;
pub use submission::{SubmissionWorkflow, UploadFile, UploadTask};
pub use tracker::ReceiptTracker;
pub use workflow::ImageMaker;
