//! `URLCheckTask` — probes a URL once and reports whether it's alive.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, ValidationError};
use crate::job::{Job, LineSink};

pub const TYPE_TAG: &str = "URLCheckTask";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct URLCheckTask {
    pub url: String,
    /// Request timeout in milliseconds; no limit if absent/zero.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

pub fn decode(serialized: &str) -> Result<Box<dyn Job>, DecodeError> {
    let task: URLCheckTask = serde_json::from_str(serialized)?;
    Ok(Box::new(task))
}

impl Job for URLCheckTask {
    fn job_type(&self) -> &'static str {
        TYPE_TAG
    }

    fn check_valid(&self) -> Result<(), ValidationError> {
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| ValidationError::new(format!("{}: {e}", self.url)))?;
        if parsed.host_str().is_none() {
            return Err(ValidationError::new(format!("{}: missing host", self.url)));
        }
        Ok(())
    }

    fn run(&self, sink: &dyn LineSink) -> (bool, String) {
        let mut builder = reqwest::blocking::Client::builder();
        if let Some(ms) = self.timeout_ms.filter(|ms| *ms > 0) {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        let client = match builder.build() {
            Ok(client) => client,
            Err(e) => {
                sink.write_line(&format!("Client Error {}: {}", self.url, e));
                return (false, e.to_string());
            }
        };

        let start = Instant::now();
        sink.write_line(&format!("Start GET {}", self.url));

        match client.get(&self.url).send() {
            Ok(resp) => {
                let status = resp.status();
                let duration = start.elapsed();
                let ok = (200..=300).contains(&status.as_u16());
                let info = format!("Status = {status}");
                if ok {
                    sink.write_line(&format!(
                        "Terminated {}, {}, duration={:?}",
                        self.url, info, duration
                    ));
                    (true, String::new())
                } else {
                    sink.write_line(&format!(
                        "Terminated with error {}, {}, duration={:?}",
                        self.url, info, duration
                    ));
                    (false, info)
                }
            }
            Err(e) => {
                sink.write_line(&format!("Request Error {}: {}", self.url, e));
                (false, e.to_string())
            }
        }
    }

    fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_valid_rejects_unparseable_url() {
        let t = URLCheckTask {
            url: "not a url".to_string(),
            timeout_ms: None,
        };
        assert!(t.check_valid().is_err());
    }

    #[test]
    fn check_valid_rejects_missing_host() {
        let t = URLCheckTask {
            url: "file:///etc/passwd".to_string(),
            timeout_ms: None,
        };
        assert!(t.check_valid().is_err());
    }

    #[test]
    fn check_valid_accepts_http_url() {
        let t = URLCheckTask {
            url: "http://example.com/health".to_string(),
            timeout_ms: Some(5000),
        };
        assert!(t.check_valid().is_ok());
    }

    #[test]
    fn encode_decode_round_trip() {
        let t = URLCheckTask {
            url: "https://example.com".to_string(),
            timeout_ms: Some(2000),
        };
        let encoded = t.encode().unwrap();
        let decoded: URLCheckTask = serde_json::from_str(&encoded).unwrap();
        assert_eq!(t.url, decoded.url);
        assert_eq!(t.timeout_ms, decoded.timeout_ms);
    }
}
