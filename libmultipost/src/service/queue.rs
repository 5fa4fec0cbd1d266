//! Post queue
//!
//! A single worker task drains queued submissions in order, so at most one
//! submission is posting at any time. Callers get a oneshot receiver that
//! resolves once every account of the submission reached a terminal state.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::orchestrator::{AccountPostResult, PostOrchestrator};
use crate::error::{MultipostError, Result};

pub type PostReceiver = oneshot::Receiver<Result<Vec<AccountPostResult>>>;

struct QueuedPost {
    submission_id: String,
    reply: oneshot::Sender<Result<Vec<AccountPostResult>>>,
}

#[derive(Clone)]
pub struct PostQueue {
    sender: mpsc::UnboundedSender<QueuedPost>,
    orchestrator: Arc<PostOrchestrator>,
}

impl PostQueue {
    /// Spawn the worker; it stops once every queue handle is dropped
    pub fn start(orchestrator: Arc<PostOrchestrator>) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<QueuedPost>();
        let worker = Arc::clone(&orchestrator);

        let handle = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                debug!(submission = %job.submission_id, "Dequeued submission");
                let result = worker.post_submission(&job.submission_id).await;
                // The caller may have stopped waiting
                let _ = job.reply.send(result);
            }
            debug!("Post queue closed");
        });

        (Self { sender, orchestrator }, handle)
    }

    /// Queue a submission after it passes validation
    pub async fn enqueue(&self, submission_id: &str) -> Result<PostReceiver> {
        self.orchestrator.ensure_postable(submission_id).await?;
        // Registered now so the submission can be cancelled while queued
        self.orchestrator.cancellation_token(submission_id);

        let (reply, receiver) = oneshot::channel();
        self.sender
            .send(QueuedPost {
                submission_id: submission_id.to_string(),
                reply,
            })
            .map_err(|_| MultipostError::InvalidInput("Post queue is closed".to_string()))?;

        info!(submission = %submission_id, "Submission queued");
        Ok(receiver)
    }

    /// Cancel a queued or posting submission
    pub fn cancel(&self, submission_id: &str) -> bool {
        self.orchestrator.cancel(submission_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::MemoryAccountStore;
    use crate::config::PostingConfig;
    use crate::registry::AdapterRegistry;
    use crate::submission::MemorySubmissionStore;
    use crate::transport::MockTransport;

    fn queue() -> (PostQueue, JoinHandle<()>) {
        let registry = Arc::new(AdapterRegistry::with_defaults(Arc::new(MockTransport::new())));
        let orchestrator = PostOrchestrator::new(
            registry,
            Arc::new(MemorySubmissionStore::new()),
            Arc::new(MemoryAccountStore::new()),
            PostingConfig::default(),
        );
        PostQueue::start(Arc::new(orchestrator))
    }

    #[tokio::test]
    async fn test_enqueue_unknown_submission_is_rejected() {
        let (queue, _worker) = queue();
        let err = queue.enqueue("missing").await.unwrap_err();
        assert!(matches!(err, MultipostError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_worker_stops_when_queue_dropped() {
        let (queue, worker) = queue();
        drop(queue);
        worker.await.unwrap();
    }
}
