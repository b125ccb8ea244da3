// Multipart/form-data writer for the request builder.
//
// Non-file parts come first in declaration order, then each `@file:`
// value becomes a file part with a Content-Type inferred from the
// filename extension.

use std::path::Path;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::errors::PrepareError;
use crate::model::Parameter;

/// Sentinel prefix marking a parameter value as a file reference.
pub const FILE_PREFIX: &str = "@file:";

/// Encodes the parameters as a multipart/form-data body.
/// Returns the body bytes and the chosen boundary.
pub fn encode(params: &[Parameter]) -> Result<(Vec<u8>, String), PrepareError> {
    let boundary: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(30)
        .map(char::from)
        .collect();

    let mut body: Vec<u8> = Vec::new();

    // Plain values first.
    for p in params {
        for v in &p.values {
            if v.starts_with(FILE_PREFIX) {
                continue;
            }
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                    escape(&p.name)
                )
                .as_bytes(),
            );
            body.extend_from_slice(v.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
    }

    // File parts afterwards.
    for p in params {
        for v in &p.values {
            let Some(path) = v.strip_prefix(FILE_PREFIX) else {
                continue;
            };
            let path = Path::new(path);
            let content = std::fs::read(path).map_err(|e| PrepareError::FileUnreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let content_type = mime_guess::from_path(path)
                .first_raw()
                .unwrap_or("application/octet-stream");

            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    escape(&p.name),
                    escape(&filename)
                )
                .as_bytes(),
            );
            body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
            body.extend_from_slice(&content);
            body.extend_from_slice(b"\r\n");
        }
    }

    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    Ok((body, boundary))
}

/// Escapes double quotes and backslashes for header parameter values.
fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
