//! Block-driven question watching.
//!
//! A `QuestionWatcher` subscribes to new block headers over the
//! WebSocket provider and re-fetches the watched question on every
//! block, emitting an update over an mpsc channel only when the record
//! actually changed. Cancellation is cooperative: the receiver side of
//! the channel is the subscription handle, and dropping it stops the
//! task at the next await point — nothing is ever published after the
//! receiver is gone.

use crate::fetch::{FetchError, FetchQuestionParams, Fetcher};
use crate::question::Question;
use alloy::providers::Provider;
use futures_util::{Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A fresh snapshot of the watched question, tagged with the block
/// that triggered the re-fetch.
#[derive(Debug, Clone)]
pub struct QuestionUpdate {
    pub block_number: u64,
    pub question: Question,
}

pub struct QuestionWatcher<P> {
    provider: P,
    fetcher: Arc<Fetcher<P>>,
    params: FetchQuestionParams,
}

impl<P: Provider + Clone + 'static> QuestionWatcher<P> {
    pub fn new(provider: P, fetcher: Arc<Fetcher<P>>, params: FetchQuestionParams) -> Self {
        Self {
            provider,
            fetcher,
            params,
        }
    }

    /// Spawn the watch task. Drop the receiver to cancel it.
    pub fn start(self) -> (mpsc::UnboundedReceiver<QuestionUpdate>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            if let Err(e) = self.run(tx).await {
                error!(error = %e, "question watch task failed");
            }
        });
        (rx, handle)
    }

    async fn run(self, tx: mpsc::UnboundedSender<QuestionUpdate>) -> anyhow::Result<()> {
        let sub = self.provider.subscribe_blocks().await?;
        let blocks = sub.into_stream().map(|header| header.number);
        info!(question_id = ?self.params.question_id, "watching question across new blocks");

        let fetcher = self.fetcher;
        let params = self.params;
        watch_loop(
            blocks,
            move |_| {
                let fetcher = fetcher.clone();
                let params = params.clone();
                async move { fetcher.fetch_question(&params).await }
            },
            tx,
        )
        .await;
        info!("question watch cancelled");
        Ok(())
    }
}

/// The watch lifecycle, generic over the block stream and the fetch so
/// the cancellation and dedup behavior can be exercised with mocks.
///
/// After every await the sender is checked against a dropped receiver
/// before anything else happens; a fetch that resolves after
/// cancellation is discarded, matching the stale-result rule.
pub(crate) async fn watch_loop<S, F, Fut>(
    mut blocks: S,
    mut fetch: F,
    tx: mpsc::UnboundedSender<QuestionUpdate>,
) where
    S: Stream<Item = u64> + Unpin,
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<Option<Question>, FetchError>>,
{
    let mut last_seen: Option<Question> = None;

    while let Some(block_number) = blocks.next().await {
        if tx.is_closed() {
            break;
        }

        let result = fetch(block_number).await;
        if tx.is_closed() {
            break;
        }

        match result {
            Ok(Some(question)) => {
                if last_seen.as_ref() == Some(&question) {
                    continue;
                }
                debug!(block = block_number, question_id = %question.id, "question state changed");
                last_seen = Some(question.clone());
                if tx
                    .send(QuestionUpdate {
                        block_number,
                        question,
                    })
                    .is_err()
                {
                    break;
                }
            }
            Ok(None) => {
                debug!(block = block_number, "question not present yet");
            }
            Err(e) => {
                // Transient upstream failure: keep watching, the next
                // block retries naturally.
                warn!(error = %e, block = block_number, "question re-fetch failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, B256, U256};
    use futures_util::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn question(bond: u64) -> Question {
        Question {
            id: B256::repeat_byte(0x11),
            content: "Did it happen?".to_string(),
            content_hash: B256::ZERO,
            template_id: 0,
            arbitrator: Address::repeat_byte(0xaa),
            timeout: 86_400,
            opening_timestamp: 1_700_000_000,
            finalization_timestamp: 0,
            pending_arbitration: false,
            bounty: U256::ZERO,
            best_answer: B256::ZERO,
            bond: U256::from(bond),
            min_bond: U256::ZERO,
            history_hash: B256::ZERO,
        }
    }

    #[tokio::test]
    async fn emits_only_on_change() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let blocks = stream::iter(vec![1u64, 2, 3, 4]);
        let bonds = [100u64, 100, 200, 200];

        watch_loop(
            blocks,
            |block| {
                let bond = bonds[(block - 1) as usize];
                async move { Ok(Some(question(bond))) }
            },
            tx,
        )
        .await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.block_number, 1);
        assert_eq!(first.question.bond, U256::from(100u64));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.block_number, 3);
        assert_eq!(second.question.bond, U256::from(200u64));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancelled_watch_never_fetches_or_publishes() {
        let (tx, rx) = mpsc::unbounded_channel::<QuestionUpdate>();
        drop(rx);

        let fetches = AtomicUsize::new(0);
        watch_loop(
            stream::iter(vec![1u64, 2, 3]),
            |_| {
                fetches.fetch_add(1, Ordering::SeqCst);
                async { Ok(Some(question(100))) }
            },
            tx,
        )
        .await;

        assert_eq!(fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn result_resolving_after_cancellation_is_discarded() {
        let (tx, rx) = mpsc::unbounded_channel::<QuestionUpdate>();
        let mut rx = Some(rx);

        // The receiver is dropped while the fetch is "in flight": the
        // loop must notice on resume and publish nothing.
        watch_loop(
            stream::iter(vec![1u64]),
            |_| {
                rx.take();
                async { Ok(Some(question(100))) }
            },
            tx,
        )
        .await;
    }

    #[tokio::test]
    async fn fetch_errors_do_not_stop_the_watch() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        watch_loop(
            stream::iter(vec![1u64, 2]),
            |block| async move {
                if block == 1 {
                    Err(FetchError::Subgraph("down".to_string()))
                } else {
                    Ok(Some(question(100)))
                }
            },
            tx,
        )
        .await;

        let update = rx.recv().await.unwrap();
        assert_eq!(update.block_number, 2);
    }
}
