//! Receipt-query retrieval for asynchronous lots.
use async_trait::async_trait;
use tracing::debug;

use super::{ApiError, Operation, ProtocolRecord, SoapExchange, rejection};
use crate::{
    config::{Environment, PollPolicy},
    document::xml::constants::{NFE_NS, SCHEMA_VERSION},
};

/// `cStat` of a lot the authority is still processing.
const LOT_IN_PROCESSING: u16 = 105;
/// `cStat` of a processed lot.
const LOT_PROCESSED: u16 = 104;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalStatus {
    Final(Vec<ProtocolRecord>),
    Pending,
}

/// Fetches the result of a lot by receipt number.
#[async_trait]
pub trait SecondaryRetrieval: Send + Sync {
    async fn poll(&self, receipt_number: &str) -> Result<RetrievalStatus, ApiError>;
}

/// `consReciNFe` over the shared SOAP exchange.
#[derive(Debug, Clone)]
pub struct ReceiptQueryRetrieval {
    exchange: SoapExchange,
    env: Environment,
}

impl ReceiptQueryRetrieval {
    pub fn new(exchange: SoapExchange, env: Environment) -> Self {
        Self { exchange, env }
    }

    fn request_xml(&self, receipt_number: &str) -> String {
        format!(
            r#"<consReciNFe xmlns="{NFE_NS}" versao="{SCHEMA_VERSION}"><tpAmb>{}</tpAmb><nRec>{}</nRec></consReciNFe>"#,
            self.env.code(),
            quick_xml::escape::escape(receipt_number)
        )
    }
}

#[async_trait]
impl SecondaryRetrieval for ReceiptQueryRetrieval {
    async fn poll(&self, receipt_number: &str) -> Result<RetrievalStatus, ApiError> {
        let operation = Operation::ReceiptQuery;
        let raw = self
            .exchange
            .send(operation, &self.request_xml(receipt_number))
            .await?;
        let response = self.exchange.classify(&raw, operation)?;
        match response.status_code() {
            LOT_IN_PROCESSING => Ok(RetrievalStatus::Pending),
            LOT_PROCESSED => Ok(RetrievalStatus::Final(response.into_protocols())),
            _ => Err(rejection(response)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Final {
        protocols: Vec<ProtocolRecord>,
        polls: u32,
    },
    Pending {
        attempts: u32,
    },
}

/// Wait one interval, poll, and repeat until a final answer or the policy's
/// attempt budget is spent. At least one poll is always made.
///
/// # Errors
/// The first error from `retrieval` ends polling and is returned.
pub async fn poll_until_final(
    retrieval: &dyn SecondaryRetrieval,
    receipt_number: &str,
    policy: PollPolicy,
) -> Result<PollOutcome, ApiError> {
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        tokio::time::sleep(policy.interval).await;
        match retrieval.poll(receipt_number).await? {
            RetrievalStatus::Final(protocols) => {
                debug!(receipt_number, attempt, "lot processed");
                return Ok(PollOutcome::Final {
                    protocols,
                    polls: attempt,
                });
            }
            RetrievalStatus::Pending => {
                debug!(receipt_number, attempt, max_attempts, "lot still processing");
            }
        }
    }
    Ok(PollOutcome::Pending {
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::VecDeque,
        sync::Mutex,
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    struct Scripted {
        replies: Mutex<VecDeque<Result<RetrievalStatus, ApiError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(replies: Vec<Result<RetrievalStatus, ApiError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl SecondaryRetrieval for Scripted {
        async fn poll(&self, _receipt_number: &str) -> Result<RetrievalStatus, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(RetrievalStatus::Pending))
        }
    }

    fn policy(attempts: u32) -> PollPolicy {
        PollPolicy::new(Duration::from_secs(3), attempts)
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_first_final_answer() {
        let retrieval = Scripted::new(vec![
            Ok(RetrievalStatus::Pending),
            Ok(RetrievalStatus::Final(Vec::new())),
        ]);
        let started = tokio::time::Instant::now();
        let outcome = poll_until_final(&retrieval, "1", policy(5)).await.unwrap();

        assert_eq!(
            outcome,
            PollOutcome::Final {
                protocols: Vec::new(),
                polls: 2
            }
        );
        assert_eq!(retrieval.calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_reports_pending() {
        let retrieval = Scripted::new(Vec::new());
        let outcome = poll_until_final(&retrieval, "1", policy(3)).await.unwrap();
        assert_eq!(outcome, PollOutcome::Pending { attempts: 3 });
        assert_eq!(retrieval.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_still_polls_once() {
        let retrieval = Scripted::new(Vec::new());
        let outcome = poll_until_final(&retrieval, "1", policy(0)).await.unwrap();
        assert_eq!(outcome, PollOutcome::Pending { attempts: 1 });
        assert_eq!(retrieval.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_end_polling() {
        let retrieval = Scripted::new(vec![Err(ApiError::Timeout { elapsed_ms: 10 })]);
        let err = poll_until_final(&retrieval, "1", policy(4)).await.unwrap_err();
        assert!(matches!(err, ApiError::Timeout { .. }));
        assert_eq!(retrieval.calls.load(Ordering::SeqCst), 1);
    }
}
