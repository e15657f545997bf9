//! Finished recordings and temporary references to them

use crate::utils::AppResult;
use bytes::{Bytes, BytesMut};
use std::io::Write;
use std::path::Path;
use tempfile::TempPath;

/// Mime type of the capture container
pub const CONTAINER_MIME: &str = "video/x-screenclip";

/// An immutable recording. Clones share the same bytes, so nothing that holds
/// a `MediaBlob` can alter what another holder sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBlob {
    data: Bytes,
    mime_type: String,
}

impl MediaBlob {
    pub fn from_bytes(data: Bytes) -> Self {
        Self {
            data,
            mime_type: CONTAINER_MIME.to_string(),
        }
    }

    /// Concatenate recorder chunks in emission order
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        let mut buf = BytesMut::new();
        for chunk in chunks {
            buf.extend_from_slice(&chunk);
        }
        Self::from_bytes(buf.freeze())
    }

    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Write the blob to a temporary file for playback.
    ///
    /// The file lives exactly as long as the returned handle.
    pub fn preview(&self) -> AppResult<PreviewHandle> {
        let mut file = tempfile::Builder::new()
            .prefix("screenclip-")
            .suffix(".sclp")
            .tempfile()?;
        file.write_all(&self.data)?;
        file.flush()?;
        let path = file.into_temp_path();
        tracing::debug!("Created preview {:?} ({} bytes)", path, self.data.len());
        Ok(PreviewHandle { path })
    }
}

/// Temporary on-disk reference to a blob, removed when dropped or released
#[derive(Debug)]
pub struct PreviewHandle {
    path: TempPath,
}

impl PreviewHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// URL the webview can load through the asset protocol
    pub fn url(&self) -> String {
        format!(
            "asset://localhost/{}",
            urlencoding::encode(&self.path.to_string_lossy())
        )
    }

    /// Delete the file now and report any error
    pub fn release(self) -> AppResult<()> {
        tracing::debug!("Releasing preview {:?}", self.path);
        self.path.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_file_removed_on_release() {
        let blob = MediaBlob::from_chunks(vec![Bytes::from_static(b"abc"), Bytes::from_static(b"def")]);
        assert_eq!(blob.as_slice(), b"abcdef");

        let preview = blob.preview().unwrap();
        let path = preview.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
        assert!(preview.url().starts_with("asset://localhost/"));

        preview.release().unwrap();
        assert!(!path.exists());
    }
}
