//! Streaming downloads to local temp files.

use std::path::Path;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};

/// Download `url` to `output_path`, streaming to disk. Returns the
/// number of bytes written.
pub async fn download_file(
    client: &reqwest::Client,
    url: &str,
    output_path: impl AsRef<Path>,
) -> MediaResult<u64> {
    let output_path = output_path.as_ref();
    debug!("downloading {} to {}", url, output_path.display());

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| MediaError::download_failed(e.to_string()))?;

    if !response.status().is_success() {
        return Err(MediaError::download_failed(format!(
            "{} returned {}",
            url,
            response.status()
        )));
    }

    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::File::create(output_path).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| MediaError::download_failed(e.to_string()))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    info!("downloaded {} bytes to {}", written, output_path.display());
    Ok(written)
}
