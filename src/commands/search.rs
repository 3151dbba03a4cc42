//! `shopsight search` - query the catalog with a local image

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use shopsight::config::Config;
use shopsight::service::{Upload, VisualSearchService};

pub fn execute(config: &Config, image: &Path, top_k: Option<usize>) -> Result<()> {
    let bytes =
        fs::read(image).with_context(|| format!("Failed to read image {}", image.display()))?;

    let service = VisualSearchService::initialize(config);
    if let Some(reason) = service.status().reason {
        bail!("Visual search unavailable: {}", reason);
    }

    let filename = image.file_name().and_then(|n| n.to_str());
    let content_type = content_type_for(image);
    let upload = Upload {
        filename,
        content_type: Some(content_type),
        bytes: &bytes,
    };

    match service.search(upload, top_k) {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(e) => bail!("{}", e),
    }
}

/// Guess an image content type from the file extension
fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("tif") | Some("tiff") => "image/tiff",
        // Decoding sniffs the real format; any image/* passes validation
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("a.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("noext")), "image/jpeg");
    }
}
