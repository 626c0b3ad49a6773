use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::SolverError;

/// Instruction sent with every challenge image
pub const CAPTCHA_INSTRUCTION: &str = "Read the characters in this image. Return only the characters as a single string, with no other explanation or formatting.";

/// An image-to-text inference backend, called once per credential
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageToText: Send + Sync {
    async fn recognize(&self, credential: &str, image_png: &[u8]) -> Result<String, SolverError>;
}

/// Result of running the credential chain once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub text: Option<String>,
    pub last_error: Option<SolverError>,
}

/// Keep only ASCII letters and digits
pub fn clean_text(raw: &str) -> String {
    raw.trim().chars().filter(char::is_ascii_alphanumeric).collect()
}

/// Try each credential in order until one yields usable text.
///
/// The first success wins and later credentials are never called. Each call is independent,
/// nothing is cached between tasks.
pub async fn solve(
    recognizer: &dyn ImageToText,
    credentials: &[String],
    image_png: &[u8],
    task_id: usize,
) -> Solution {
    let mut last_error = SolverError::NoCredentials;

    for (index, credential) in credentials.iter().enumerate() {
        debug!("[task {}] Solving challenge with key #{}", task_id, index + 1);

        let result = recognizer
            .recognize(credential, image_png)
            .await
            .map(|raw| clean_text(&raw));

        match result {
            Ok(text) if !text.is_empty() => {
                return Solution {
                    text: Some(text),
                    last_error: None,
                };
            }
            Ok(_) => last_error = SolverError::EmptyResponse,
            Err(e) => last_error = e,
        }

        warn!("[task {}] Key #{} failed: {}", task_id, index + 1, last_error);
    }

    Solution {
        text: None,
        last_error: Some(last_error),
    }
}
