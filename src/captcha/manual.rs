use std::io::BufRead;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};

/// Human-in-the-loop challenge entry, only reachable when the browser window is visible
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ManualEntry: Send + Sync {
    /// Block until the operator has dealt with the challenge.
    ///
    /// Returns the text to type into the challenge field, or `None` when the operator
    /// entered it directly in the browser window.
    async fn request(&self, task_id: usize, display_name: &str) -> Result<Option<String>>;
}

/// Prompts on the terminal; concurrent workers queue behind one another.
///
/// Terminal lines come from a single reader thread over a channel, so a prompt that is
/// abandoned midway leaves the next line for the next prompt.
pub struct ConsolePrompt {
    lines: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl ConsolePrompt {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(None),
        }
    }

    #[cfg(test)]
    fn from_lines(lines: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            lines: Mutex::new(Some(lines)),
        }
    }
}

impl Default for ConsolePrompt {
    fn default() -> Self {
        Self::new()
    }
}

/// Started on the first prompt; the thread owns stdin until the process exits
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    rx
}

#[async_trait]
impl ManualEntry for ConsolePrompt {
    async fn request(&self, task_id: usize, display_name: &str) -> Result<Option<String>> {
        let mut guard = self.lines.lock().await;
        let lines = guard.get_or_insert_with(spawn_stdin_reader);

        let mut stdout = tokio::io::stdout();
        let prompt = format!(
            "\n---> [task {}] Enter the CAPTCHA for '{}' (type it here, or fill it in the browser and press ENTER): ",
            task_id, display_name
        );
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.flush().await?;

        let line = lines
            .recv()
            .await
            .context("Terminal input closed while waiting for a CAPTCHA")?;

        let text = line.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }
}
