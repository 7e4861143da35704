use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::Result;
use crate::models::Upload;

const FALLBACK_MIME: &str = "application/octet-stream";

/// A locally generated preview of a pending upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub bytes: Vec<u8>,
    pub data_url: String,
}

pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    infer::get(bytes)
        .map(|kind| kind.mime_type())
        .unwrap_or(FALLBACK_MIME)
}

pub fn data_url(bytes: &[u8]) -> String {
    format!("data:{};base64,{}", sniff_mime(bytes), STANDARD.encode(bytes))
}

pub async fn read_preview(upload: &Upload) -> Result<Preview> {
    let bytes = upload.read().await?;
    let data_url = data_url(&bytes);
    Ok(Preview { bytes, data_url })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    #[test]
    fn png_bytes_get_png_mime() {
        assert_eq!(sniff_mime(&PNG_HEADER), "image/png");
        assert!(data_url(&PNG_HEADER).starts_with("data:image/png;base64,"));
    }

    #[test]
    fn unknown_bytes_fall_back() {
        assert_eq!(data_url(b"abc"), "data:application/octet-stream;base64,YWJj");
    }

    #[tokio::test]
    async fn preview_keeps_the_bytes_it_encoded() {
        let upload = Upload::from_bytes("shot.png", PNG_HEADER.to_vec());
        let preview = read_preview(&upload).await.unwrap();
        assert_eq!(preview.bytes, PNG_HEADER.to_vec());
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let upload = Upload::from_path("/nonexistent/shotsync/missing.png");
        assert!(read_preview(&upload).await.is_err());
    }
}
