//! Log file listing and reading through in-instance command execution.

use crate::gateway::RuntimeGateway;
use crate::naming;
use mt5_common::{FleetError, LogCategory, Result};
use std::sync::Arc;
use tracing::{instrument, warn};

/// Prefix of the text returned when the in-instance read command fails.
pub const READ_ERROR_PREFIX: &str = "Error reading file: ";

const LOG_EXTENSION: &str = ".log";

type Decoder = fn(&[u8]) -> Option<String>;

/// Strict decoders tried in order. The terminal lossy UTF-8 step in
/// [`decode_log_bytes`] always produces text.
const DECODERS: &[Decoder] = &[decode_utf16, decode_utf8];

#[derive(Clone)]
pub struct LogAccessor {
    gateway: Arc<dyn RuntimeGateway>,
}

impl LogAccessor {
    pub fn new(gateway: Arc<dyn RuntimeGateway>) -> Self {
        Self { gateway }
    }

    /// `.log` entries of the category directory, newest first under the
    /// date-prefixed naming the terminal uses. Empty on any failure.
    #[instrument(skip(self))]
    pub async fn list_files(&self, id: &str, category: LogCategory) -> Vec<String> {
        let cmd = vec![
            "ls".to_string(),
            "-1".to_string(),
            naming::log_dir(category).to_string(),
        ];
        let result = match self.gateway.exec(id, &cmd).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Error getting log list");
                return Vec::new();
            }
        };
        if !result.success() {
            warn!(
                exit_code = result.exit_code,
                output = %String::from_utf8_lossy(&result.output),
                "Error listing logs"
            );
            return Vec::new();
        }

        let mut files: Vec<String> = String::from_utf8_lossy(&result.output)
            .lines()
            .map(str::trim)
            .filter(|name| name.ends_with(LOG_EXTENSION))
            .map(str::to_string)
            .collect();
        files.sort_unstable_by(|a, b| b.cmp(a));
        files
    }

    /// Decoded contents of one log file. A failed read command is not an
    /// error: its output comes back behind [`READ_ERROR_PREFIX`].
    #[instrument(skip(self))]
    pub async fn read_file(&self, id: &str, category: LogCategory, filename: &str) -> Result<String> {
        validate_log_name(filename)?;
        let cmd = vec![
            "cat".to_string(),
            format!("{}{}", naming::log_dir(category), filename),
        ];
        let result = self.gateway.exec(id, &cmd).await?;

        if !result.success() {
            return Ok(format!(
                "{READ_ERROR_PREFIX}{}",
                String::from_utf8_lossy(&result.output)
            ));
        }
        Ok(decode_log_bytes(&result.output))
    }
}

/// A bare `.log` file name: nothing that could leave the category directory.
pub fn validate_log_name(filename: &str) -> Result<()> {
    let valid = filename.ends_with(LOG_EXTENSION)
        && filename.len() > LOG_EXTENSION.len()
        && !filename.contains('/')
        && !filename.contains('\\')
        && !filename.contains("..")
        && !filename.contains('\0');
    if valid {
        Ok(())
    } else {
        Err(FleetError::InvalidInput(format!(
            "invalid log file name '{filename}'"
        )))
    }
}

pub fn decode_log_bytes(raw: &[u8]) -> String {
    DECODERS
        .iter()
        .find_map(|decode| decode(raw))
        .unwrap_or_else(|| String::from_utf8_lossy(raw).into_owned())
}

/// UTF-16 with BOM detection, little-endian when there is none. Rejects odd
/// lengths and unpaired surrogates.
fn decode_utf16(raw: &[u8]) -> Option<String> {
    if raw.len() % 2 != 0 {
        return None;
    }
    let (body, big_endian) = match raw {
        [0xFF, 0xFE, rest @ ..] => (rest, false),
        [0xFE, 0xFF, rest @ ..] => (rest, true),
        _ => (raw, false),
    };
    let units = body.chunks_exact(2).map(|pair| {
        let bytes = [pair[0], pair[1]];
        if big_endian {
            u16::from_be_bytes(bytes)
        } else {
            u16::from_le_bytes(bytes)
        }
    });
    char::decode_utf16(units).collect::<std::result::Result<String, _>>().ok()
}

fn decode_utf8(raw: &[u8]) -> Option<String> {
    std::str::from_utf8(raw).ok().map(str::to_string)
}
