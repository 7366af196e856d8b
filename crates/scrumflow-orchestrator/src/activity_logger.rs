//! Activity Logger - Human-readable run logging to `.scrumflow/activity.md`
//!
//! Records run starts, each completed node with a preview of the newest
//! message, suspensions, and final outcomes.

use chrono::Utc;
use scrumflow_core::fail_open::fail_open;
use scrumflow_core::Interrupt;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Maximum character length for message previews in the activity log
const ACTIVITY_LOG_PREVIEW_CHARS: usize = 300;

pub struct ActivityLogger {
    output_path: PathBuf,
}

impl ActivityLogger {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            output_path: dir.join("activity.md"),
        }
    }

    /// Log the start of a run on a thread
    ///
    /// This operation is fail-open - logging failures won't stop the run
    pub async fn log_run_start(&self, thread_id: &str, graph: &str, request: &str) {
        fail_open("activity_logger::log_run_start", || async {
            let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
            let content = format!(
                "## Thread: {}\n**Graph**: {}\n**Started**: {}\n**Request**: {}\n\n",
                thread_id,
                graph,
                timestamp,
                request.lines().next().unwrap_or(request)
            );
            self.append_internal(&content).await
        })
        .await;
    }

    pub async fn log_node(&self, thread_id: &str, node: &str, step: usize, last_message: &str) {
        fail_open("activity_logger::log_node", || async {
            let mut content = format!("### {} / step {}: {}\n\n", thread_id, step, node);
            if !last_message.is_empty() {
                content.push_str("> ");
                content.push_str(&preview(last_message).replace('\n', "\n> "));
                content.push_str("\n\n");
            }
            self.append_internal(&content).await
        })
        .await;
    }

    pub async fn log_suspended(&self, thread_id: &str, interrupt: &Interrupt) {
        fail_open("activity_logger::log_suspended", || async {
            let content = format!(
                "**Suspended** {} at '{}' ({:?}): {}\n\n",
                thread_id,
                interrupt.node,
                interrupt.kind,
                interrupt.prompt()
            );
            self.append_internal(&content).await
        })
        .await;
    }

    pub async fn log_finished(&self, thread_id: &str, steps: usize) {
        fail_open("activity_logger::log_finished", || async {
            let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
            let content = format!(
                "**Finished** {} after {} steps at {}\n\n---\n\n",
                thread_id, steps, timestamp
            );
            self.append_internal(&content).await
        })
        .await;
    }

    pub async fn log_failed(&self, thread_id: &str, node: &str, error: &str) {
        fail_open("activity_logger::log_failed", || async {
            let content = format!(
                "**Failed** {} at '{}': {}\n\n---\n\n",
                thread_id, node, error
            );
            self.append_internal(&content).await
        })
        .await;
    }

    async fn append_internal(&self, content: &str) -> scrumflow_core::Result<()> {
        if let Some(parent) = self.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .await?;

        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > ACTIVITY_LOG_PREVIEW_CHARS {
        let truncated: String = text.chars().take(ACTIVITY_LOG_PREVIEW_CHARS).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}
