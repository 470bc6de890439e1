use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use reqwest::header::HeaderMap;
use std::time::Duration;

/// Runs a blocking HTTP exchange on its own thread so callers may sit inside
/// the tokio runtime.
pub fn run_blocking<T, F>(job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    std::thread::spawn(job)
        .join()
        .map_err(|_| anyhow!("HTTP worker thread panicked"))?
}

pub fn build_client(timeout_seconds: u64, headers: HeaderMap) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_seconds.max(5)))
        .default_headers(headers)
        .build()
        .context("Failed to create HTTP client")
}

/// Pulls the JSON object out of a model reply that may wrap it in a fenced
/// block or surrounding prose.
pub fn extract_json_block(content: &str) -> String {
    let fenced = content.split("```").map(str::trim).find_map(|block| {
        block
            .strip_prefix("json")
            .map(str::trim)
            .or_else(|| block.starts_with('{').then_some(block))
    });

    match fenced {
        Some(block) => block.to_string(),
        None => {
            let first = content.find('{');
            let last = content.rfind('}');

            match (first, last) {
                (Some(start), Some(end)) if end > start => content[start..=end].to_string(),
                _ => content.trim().to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::extract_json_block;

    #[test]
    fn extracts_fenced_json() {
        let reply = "Here you go:\n```json\n{\"term\":\"ETF\"}\n```";
        assert_eq!(extract_json_block(reply), "{\"term\":\"ETF\"}");
    }

    #[test]
    fn extracts_inline_object() {
        assert_eq!(
            extract_json_block("result => {\"a\":1} done"),
            "{\"a\":1}"
        );
    }
}
