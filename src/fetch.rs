use actix_web::web::{Bytes, BytesMut};
use tracing::debug;

use crate::error::{VisionError, VisionResult};

/// Downloads the image behind `url`. Non-2xx answers and bodies larger than
/// `max_bytes` count as failures.
pub async fn fetch_image(
    client: &reqwest::Client,
    url: &str,
    max_bytes: usize,
) -> VisionResult<Bytes> {
    let mut response = client.get(url).send().await?.error_for_status()?;
    if let Some(len) = response.content_length() {
        if len > max_bytes as u64 {
            return Err(too_large(len, max_bytes));
        }
    }

    let mut data = BytesMut::new();
    while let Some(chunk) = response.chunk().await? {
        if data.len() + chunk.len() > max_bytes {
            return Err(too_large((data.len() + chunk.len()) as u64, max_bytes));
        }
        data.extend_from_slice(&chunk);
    }
    debug!(url, len = data.len(), "fetched image");
    Ok(data.freeze())
}

fn too_large(len: u64, max_bytes: usize) -> VisionError {
    VisionError::Fetch(format!(
        "remote image exceeds {} bytes (got at least {})",
        max_bytes, len
    ))
}
