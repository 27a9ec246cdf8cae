pub mod client;
pub mod models;

pub use client::{AuthenticatedUrl, NimClient, ResponseError};
pub use models::*;

use client::IMAGES_PATH;

// Session-bound endpoints. All but the catalog take the session key as the
// last segment.

pub fn image_infos_endpoint() -> String {
    format!("{IMAGES_PATH}/infos")
}

pub fn create_image_endpoint(image_id: &str) -> String {
    format!("{IMAGES_PATH}/create/{}", urlencoding::encode(image_id))
}

pub fn receipt_endpoint(receipt_id: &str) -> String {
    format!("{IMAGES_PATH}/receipt/{}", urlencoding::encode(receipt_id))
}

pub fn download_endpoint(receipt_id: &str) -> String {
    format!("{IMAGES_PATH}/{}", urlencoding::encode(receipt_id))
}
