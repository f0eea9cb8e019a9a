//! Loading JSON documents from files, strings and HTTP URLs.
//!
//! Definitions and create inputs are plain JSON; these helpers read the
//! document and deserialize it into the crate's types.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::artifact::CreateSchemaInput;
use crate::definition::SchemaDefinition;
use crate::error::LoadError;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Read a document's text from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist.
pub fn load_text(path: &Path) -> Result<String, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a JSON document from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or `LoadError::InvalidJson` if the file isn't valid JSON.
pub fn load_json(path: &Path) -> Result<Value, LoadError> {
    load_json_str(&load_text(path)?)
}

pub fn load_json_str(content: &str) -> Result<Value, LoadError> {
    serde_json::from_str(content).map_err(|source| LoadError::InvalidJson { source })
}

/// Fetch a document's text over HTTP(S).
///
/// Requires the `remote` feature (enabled by default). Non-success status
/// codes are reported as `NetworkError`.
#[cfg(feature = "remote")]
pub fn load_text_url(url: &str) -> Result<String, LoadError> {
    let network = |source| LoadError::NetworkError {
        url: url.to_string(),
        source,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(network)?;

    tracing::debug!(url, "fetching document");
    client
        .get(url)
        .send()
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.text())
        .map_err(network)
}

/// Fetch a JSON document over HTTP(S).
#[cfg(feature = "remote")]
pub fn load_json_url(url: &str) -> Result<Value, LoadError> {
    load_json_str(&load_text_url(url)?)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Read text from a file path or URL, whichever `source` looks like.
///
/// Without the `remote` feature a URL is reported as a missing file.
pub fn load_text_auto(source: &str) -> Result<String, LoadError> {
    if is_url(source) {
        #[cfg(feature = "remote")]
        {
            load_text_url(source)
        }
        #[cfg(not(feature = "remote"))]
        {
            Err(LoadError::FileNotFound {
                path: std::path::PathBuf::from(source),
            })
        }
    } else {
        load_text(Path::new(source))
    }
}

/// Load a JSON document from a file path or URL.
pub fn load_json_auto(source: &str) -> Result<Value, LoadError> {
    load_json_str(&load_text_auto(source)?)
}

// Deserialize from the text itself: a `Value` would merge repeated keys
// before the shape could reject them.
fn from_text<T: DeserializeOwned>(content: &str, what: &'static str) -> Result<T, LoadError> {
    serde_json::from_str(content).map_err(|source| {
        if source.is_data() {
            LoadError::InvalidDefinition { what, source }
        } else {
            LoadError::InvalidJson { source }
        }
    })
}

/// Deserialize a definition document.
pub fn parse_definition(content: &str) -> Result<SchemaDefinition, LoadError> {
    from_text(content, "schema definition")
}

/// Deserialize a create-input document.
pub fn parse_input(content: &str) -> Result<CreateSchemaInput, LoadError> {
    from_text(content, "create input")
}

/// Load a [`SchemaDefinition`] from a file path or URL.
///
/// The structural check is left to the caller, so malformed definitions can
/// still be inspected.
pub fn load_definition(source: &str) -> Result<SchemaDefinition, LoadError> {
    parse_definition(&load_text_auto(source)?)
}

/// Load a [`CreateSchemaInput`] from a file path or URL.
pub fn load_input(source: &str) -> Result<CreateSchemaInput, LoadError> {
    parse_input(&load_text_auto(source)?)
}
