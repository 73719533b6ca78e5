//! Command execution.

use crate::Commands;
use colored::Colorize;
use kwire_client::{Client, RawReply};
use kwire_protocol::{ApiKey, ApiVersionsResponse, ErrorCode};
use serde_json::json;

/// Executes a command and returns the formatted output.
pub async fn execute(
    client: &Client,
    cmd: Commands,
    as_json: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::ApiVersions { version } => {
            let response = client.api_versions(version).await?;
            if as_json {
                Ok(serde_json::to_string_pretty(&response)?)
            } else {
                Ok(format_api_versions(&response))
            }
        }

        Commands::Raw {
            api_key,
            api_version,
        } => {
            let (request, reply) = client.request_raw(api_key, api_version).await?;
            if as_json {
                let value = match &reply {
                    RawReply::Frame(payload) => json!({
                        "correlation_id": request.correlation_id,
                        "kind": "frame",
                        "bytes": payload.to_vec(),
                    }),
                    RawReply::Unframed(text) => json!({
                        "correlation_id": request.correlation_id,
                        "kind": "unframed",
                        "text": String::from_utf8_lossy(text),
                    }),
                    RawReply::Closed => json!({
                        "correlation_id": request.correlation_id,
                        "kind": "closed",
                    }),
                };
                Ok(serde_json::to_string_pretty(&value)?)
            } else {
                Ok(format_raw_reply(request.correlation_id, &reply))
            }
        }
    }
}

/// Formats an ApiVersions response as a table.
fn format_api_versions(response: &ApiVersionsResponse) -> String {
    let status = match response.error() {
        Some(ErrorCode::None) => "OK".green().to_string(),
        Some(code) => code.to_string().red().to_string(),
        None => format!("error {}", response.error_code).red().to_string(),
    };

    let mut output = format!("{} {}\n", "ApiVersions".bold(), status);
    for entry in &response.api_keys {
        let name = ApiKey::from_i16(entry.api_key)
            .map(|k| k.name())
            .unwrap_or("Unknown");
        output.push_str(&format!(
            "  {:>4}  {:<16} v{}-v{}\n",
            entry.api_key,
            name.cyan(),
            entry.min_version,
            entry.max_version
        ));
    }
    output.push_str(&format!(
        "{}: {} ms",
        "Throttle".dimmed(),
        response.throttle_time_ms
    ));
    output
}

/// Formats a raw reply for display.
fn format_raw_reply(correlation_id: i32, reply: &RawReply) -> String {
    match reply {
        RawReply::Frame(payload) => format!(
            "{} (correlation_id={}, {} bytes)\n  {}",
            "Frame".green(),
            correlation_id,
            payload.len(),
            hex_dump(payload)
        ),
        RawReply::Unframed(text) => format!(
            "{} (connection closed)\n  {}",
            "Unframed reply".yellow(),
            String::from_utf8_lossy(text)
        ),
        RawReply::Closed => "Connection closed without a reply".yellow().to_string(),
    }
}

/// Formats bytes as space-separated hex pairs.
fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
