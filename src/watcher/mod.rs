//! Poll → diff → fetch → evaluate → challenge-if-bad → record → sleep.
//!
//! A single sequential worker. The only suspension point that is not an
//! external call is the sleep between cycles, and that sleep is raced against
//! the shutdown channel. Every external call is wrapped in a caller-side
//! timeout; a timeout counts as a failure of that call.

use crate::content::{ContentSource, FetchError};
use crate::config::ResolvedSettings;
use crate::evaluator::{DocumentEvaluator, EvaluationError, EvaluationVerdict};
use crate::onchain::{ChallengeError, ChallengeReceipt, ChallengeSubmitter};
use crate::registry::{QueryError, Question, RegistryQuery};
use crate::store::ProcessedSet;

use alloy::primitives::{Address, B256};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub registry: Address,
    pub poll_interval: Duration,
    /// Subgraph, gateway and evaluator calls.
    pub call_timeout: Duration,
    /// Whole challenge sequence, mining included.
    pub challenge_timeout: Duration,
    /// Answer we post when challenging.
    pub challenge_answer: B256,
}

impl From<&ResolvedSettings> for WatcherSettings {
    fn from(s: &ResolvedSettings) -> Self {
        Self {
            registry: s.registry,
            poll_interval: s.poll_interval,
            call_timeout: s.call_timeout,
            challenge_timeout: s.challenge_timeout,
            challenge_answer: s.challenge_answer,
        }
    }
}

/// Why a question was left unprocessed this cycle.
#[derive(Error, Debug)]
pub enum QuestionError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

#[derive(Debug)]
pub enum ChallengeStatus {
    Submitted(ChallengeReceipt),
    Failed(ChallengeError),
    /// Same question already challenged earlier in this cycle.
    Duplicate,
    /// The question's current answer is already the one we would post.
    AlreadyOurAnswer,
}

#[derive(Debug)]
pub enum QuestionOutcome {
    Good(EvaluationVerdict),
    Bad(EvaluationVerdict, ChallengeStatus),
}

/// Counters for one poll cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub polled: usize,
    pub already_processed: usize,
    pub good: usize,
    pub challenged: usize,
    pub challenge_failed: usize,
    pub already_answered: usize,
    pub errors: usize,
    pub query_failed: bool,
}

pub struct Watcher<R, F, E, C> {
    registry: R,
    fetcher: F,
    evaluator: E,
    challenger: C,
    processed: ProcessedSet,
    settings: WatcherSettings,
}

impl<R, F, E, C> Watcher<R, F, E, C>
where
    R: RegistryQuery,
    F: ContentSource,
    E: DocumentEvaluator,
    C: ChallengeSubmitter,
{
    pub fn new(
        registry: R,
        fetcher: F,
        evaluator: E,
        challenger: C,
        processed: ProcessedSet,
        settings: WatcherSettings,
    ) -> Self {
        Self {
            registry,
            fetcher,
            evaluator,
            challenger,
            processed,
            settings,
        }
    }

    pub fn processed(&self) -> &ProcessedSet {
        &self.processed
    }

    /// Run cycles until `shutdown` fires, then flush state and hand the set
    /// back to the caller.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> ProcessedSet {
        info!(
            registry = %self.settings.registry,
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            known_hashes = self.processed.len(),
            max_hashes = self.processed.max_size(),
            persistent = self.processed.is_persistent(),
            "watcher started"
        );

        loop {
            self.run_cycle().await;
            self.persist();

            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("shutdown requested, stopping watcher");
                    break;
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        self.persist();
        self.processed
    }

    /// One poll cycle. Per-question failures are logged and counted, never
    /// propagated.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        let questions = match self.poll().await {
            Ok(questions) => questions,
            Err(e) => {
                warn!(error = %e, "registry query failed, no new data this cycle");
                report.query_failed = true;
                return report;
            }
        };
        report.polled = questions.len();

        let mut challenged = HashSet::new();
        for question in &questions {
            if self.processed.contains(&question.content_hash) {
                report.already_processed += 1;
                continue;
            }

            match self.process_question(question, &mut challenged).await {
                Ok(outcome) => self.record(question, outcome, &mut report),
                Err(e) => {
                    report.errors += 1;
                    warn!(
                        question_id = %question.question_id,
                        content_hash = %question.content_hash,
                        error = %e,
                        "question skipped, will retry next cycle"
                    );
                }
            }
        }

        info!(
            polled = report.polled,
            already_processed = report.already_processed,
            good = report.good,
            challenged = report.challenged,
            challenge_failed = report.challenge_failed,
            already_answered = report.already_answered,
            errors = report.errors,
            tracked = self.processed.len(),
            "cycle complete"
        );
        report
    }

    async fn poll(&self) -> Result<Vec<Question>, QueryError> {
        let t = self.settings.call_timeout;
        timeout(t, self.registry.fetch_open_questions(self.settings.registry))
            .await
            .map_err(|_| QueryError::Timeout(t))?
    }

    async fn process_question(
        &self,
        question: &Question,
        challenged: &mut HashSet<B256>,
    ) -> Result<QuestionOutcome, QuestionError> {
        let t = self.settings.call_timeout;
        debug!(
            question_id = %question.question_id,
            content_hash = %question.content_hash,
            "new content hash"
        );

        let document = timeout(t, self.fetcher.fetch(&question.content_hash))
            .await
            .map_err(|_| FetchError::Timeout(t))??;
        let verdict = timeout(t, self.evaluator.evaluate(&document))
            .await
            .map_err(|_| EvaluationError::Timeout(t))??;

        if verdict.is_good {
            return Ok(QuestionOutcome::Good(verdict));
        }

        // An evicted hash can come back while our answer still stands.
        if question.current_answer == Some(self.settings.challenge_answer) {
            return Ok(QuestionOutcome::Bad(verdict, ChallengeStatus::AlreadyOurAnswer));
        }

        if !challenged.insert(question.question_id) {
            return Ok(QuestionOutcome::Bad(verdict, ChallengeStatus::Duplicate));
        }

        let ct = self.settings.challenge_timeout;
        let submit = self.challenger.submit(question.question_id, question.current_bond);
        let status = match timeout(ct, submit).await {
            Ok(Ok(receipt)) => ChallengeStatus::Submitted(receipt),
            Ok(Err(e)) => ChallengeStatus::Failed(e),
            Err(_) => ChallengeStatus::Failed(ChallengeError::SubmissionFailed(format!(
                "no result within {:?}",
                ct
            ))),
        };
        Ok(QuestionOutcome::Bad(verdict, status))
    }

    fn record(&mut self, question: &Question, outcome: QuestionOutcome, report: &mut CycleReport) {
        let qid = question.question_id;
        let hash = question.content_hash.as_str();

        match &outcome {
            QuestionOutcome::Good(v) => {
                report.good += 1;
                info!(
                    question_id = %qid,
                    content_hash = %hash,
                    verdict = v.label(),
                    confidence = v.confidence,
                    "evaluated"
                );
            }
            QuestionOutcome::Bad(v, ChallengeStatus::Submitted(receipt)) => {
                report.challenged += 1;
                info!(
                    question_id = %qid,
                    content_hash = %hash,
                    verdict = v.label(),
                    confidence = v.confidence,
                    bond_wei = %receipt.bond,
                    tx_hash = %receipt.tx_hash,
                    block = ?receipt.block_number,
                    gas_used = receipt.gas_used,
                    "CHALLENGED"
                );
            }
            QuestionOutcome::Bad(v, ChallengeStatus::Failed(ChallengeError::AlreadyFinalized)) => {
                report.challenge_failed += 1;
                info!(
                    question_id = %qid,
                    content_hash = %hash,
                    verdict = v.label(),
                    confidence = v.confidence,
                    "question finalized before challenge"
                );
            }
            QuestionOutcome::Bad(v, ChallengeStatus::Failed(e)) => {
                report.challenge_failed += 1;
                error!(
                    question_id = %qid,
                    content_hash = %hash,
                    verdict = v.label(),
                    confidence = v.confidence,
                    error = %e,
                    "challenge failed, not retried"
                );
            }
            QuestionOutcome::Bad(v, ChallengeStatus::AlreadyOurAnswer) => {
                report.already_answered += 1;
                info!(
                    question_id = %qid,
                    content_hash = %hash,
                    verdict = v.label(),
                    confidence = v.confidence,
                    "current answer is already ours, not challenging"
                );
            }
            QuestionOutcome::Bad(v, ChallengeStatus::Duplicate) => {
                info!(
                    question_id = %qid,
                    content_hash = %hash,
                    verdict = v.label(),
                    "question already challenged this cycle"
                );
            }
        }

        if let Some(evicted) = self.processed.add(hash) {
            debug!(evicted = %evicted, "oldest processed hash evicted");
        }
    }

    fn persist(&mut self) {
        if let Err(e) = self.processed.save_if_dirty() {
            error!(error = %e, "failed to persist processed hashes, keeping in-memory state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onchain::challenge::testing::{FakeLedger, LedgerCall};
    use crate::onchain::Challenger;
    use alloy::primitives::U256;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const H1: &str = "QmHashOne";
    const H2: &str = "QmHashTwo";

    struct FakeRegistry {
        questions: Mutex<Result<Vec<Question>, String>>,
        hang: bool,
    }

    impl FakeRegistry {
        fn with(questions: Vec<Question>) -> Self {
            Self {
                questions: Mutex::new(Ok(questions)),
                hang: false,
            }
        }

        fn failing() -> Self {
            Self {
                questions: Mutex::new(Err("subgraph down".to_string())),
                hang: false,
            }
        }

        fn hanging() -> Self {
            Self {
                hang: true,
                ..Self::with(Vec::new())
            }
        }

        fn set(&self, questions: Vec<Question>) {
            *self.questions.lock().unwrap() = Ok(questions);
        }
    }

    impl RegistryQuery for FakeRegistry {
        async fn fetch_open_questions(
            &self,
            _registry: Address,
        ) -> Result<Vec<Question>, QueryError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.questions.lock().unwrap().clone().map_err(QueryError::Graph)
        }
    }

    /// Serves documents by hash; `failures` counts down forced errors per hash.
    struct FakeFetcher {
        docs: HashMap<String, Vec<u8>>,
        failures: Mutex<HashMap<String, usize>>,
        fetched: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl FakeFetcher {
        fn new(docs: &[(&str, &str)]) -> Self {
            Self {
                docs: docs
                    .iter()
                    .map(|(h, d)| (h.to_string(), d.as_bytes().to_vec()))
                    .collect(),
                failures: Mutex::new(HashMap::new()),
                fetched: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn fail_next(self, hash: &str, times: usize) -> Self {
            self.failures.lock().unwrap().insert(hash.to_string(), times);
            self
        }

        fn fetched(&self) -> Vec<String> {
            self.fetched.lock().unwrap().clone()
        }
    }

    impl ContentSource for FakeFetcher {
        async fn fetch(&self, content_hash: &str) -> Result<Vec<u8>, FetchError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.fetched.lock().unwrap().push(content_hash.to_string());
            if let Some(left) = self.failures.lock().unwrap().get_mut(content_hash) {
                if *left > 0 {
                    *left -= 1;
                    return Err(FetchError::Status {
                        hash: content_hash.to_string(),
                        status: 504,
                    });
                }
            }
            self.docs
                .get(content_hash)
                .cloned()
                .ok_or_else(|| FetchError::Status {
                    hash: content_hash.to_string(),
                    status: 404,
                })
        }
    }

    /// Documents are the literal verdict: `good`, `bad`, anything else fails.
    struct FakeEvaluator {
        calls: Mutex<usize>,
        delay: Option<Duration>,
    }

    impl FakeEvaluator {
        fn new() -> Self {
            Self {
                calls: Mutex::new(0),
                delay: None,
            }
        }

        fn delayed(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::new()
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl DocumentEvaluator for FakeEvaluator {
        async fn evaluate(&self, document: &[u8]) -> Result<EvaluationVerdict, EvaluationError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            *self.calls.lock().unwrap() += 1;
            match document {
                b"good" => Ok(EvaluationVerdict {
                    is_good: true,
                    confidence: 0.9,
                }),
                b"bad" => Ok(EvaluationVerdict {
                    is_good: false,
                    confidence: 0.8,
                }),
                other => Err(EvaluationError::UnparseableResponse(
                    String::from_utf8_lossy(other).into_owned(),
                )),
            }
        }
    }

    /// Never finishes within any sane challenge timeout.
    struct StalledSubmitter {
        calls: Mutex<usize>,
    }

    impl ChallengeSubmitter for StalledSubmitter {
        async fn submit(
            &self,
            _question_id: B256,
            _current_bond: U256,
        ) -> Result<ChallengeReceipt, ChallengeError> {
            *self.calls.lock().unwrap() += 1;
            tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
            Err(ChallengeError::SubmissionFailed("stalled".to_string()))
        }
    }

    type TestWatcher =
        Watcher<FakeRegistry, FakeFetcher, FakeEvaluator, Challenger<FakeLedger>>;

    fn question(id: u8, hash: &str, bond: u64) -> Question {
        Question {
            question_id: B256::repeat_byte(id),
            content_hash: hash.to_string(),
            current_bond: U256::from(bond),
            current_answer: None,
            finalized: false,
        }
    }

    fn settings() -> WatcherSettings {
        WatcherSettings {
            registry: Address::repeat_byte(0xaa),
            poll_interval: Duration::from_secs(3600),
            call_timeout: Duration::from_secs(5),
            challenge_timeout: Duration::from_secs(5),
            challenge_answer: B256::ZERO,
        }
    }

    fn watcher(
        registry: FakeRegistry,
        fetcher: FakeFetcher,
        ledger: FakeLedger,
        processed: ProcessedSet,
    ) -> TestWatcher {
        let challenger = Challenger::new(ledger, U256::from(1_000u64), B256::ZERO);
        Watcher::new(registry, fetcher, FakeEvaluator::new(), challenger, processed, settings())
    }

    #[tokio::test]
    async fn test_good_document_is_recorded_without_challenge() {
        let mut w = watcher(
            FakeRegistry::with(vec![question(1, H1, 100)]),
            FakeFetcher::new(&[(H1, "good")]),
            FakeLedger::open(),
            ProcessedSet::in_memory(10),
        );

        let report = w.run_cycle().await;
        assert_eq!(report.good, 1);
        assert_eq!(report.challenged, 0);
        assert!(w.processed().contains(H1));
        assert!(w.challenger.ledger().calls().is_empty());
    }

    #[tokio::test]
    async fn test_bad_document_is_challenged_with_double_bond() {
        let mut w = watcher(
            FakeRegistry::with(vec![question(1, H1, 100)]),
            FakeFetcher::new(&[(H1, "bad")]),
            FakeLedger::open(),
            ProcessedSet::in_memory(10),
        );

        let report = w.run_cycle().await;
        assert_eq!(report.challenged, 1);
        assert!(w.processed().contains(H1));

        let sends = w.challenger.ledger().sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].question_id, B256::repeat_byte(1));
        assert_eq!(sends[0].bond, U256::from(200));
        assert_eq!(sends[0].max_previous, U256::from(100));
    }

    #[tokio::test]
    async fn test_finalized_at_submission_sends_nothing_but_records() {
        let mut w = watcher(
            FakeRegistry::with(vec![question(1, H1, 100)]),
            FakeFetcher::new(&[(H1, "bad")]),
            FakeLedger::finalized(),
            ProcessedSet::in_memory(10),
        );

        let report = w.run_cycle().await;
        assert_eq!(report.challenge_failed, 1);
        assert_eq!(report.challenged, 0);
        assert!(w.processed().contains(H1));
        assert_eq!(
            w.challenger.ledger().calls(),
            vec![LedgerCall::IsFinalized(B256::repeat_byte(1))]
        );
    }

    #[tokio::test]
    async fn test_processed_hash_is_never_fetched_again() {
        let mut w = watcher(
            FakeRegistry::with(vec![question(1, H1, 100)]),
            FakeFetcher::new(&[(H1, "bad")]),
            FakeLedger::open(),
            ProcessedSet::in_memory(10),
        );

        w.run_cycle().await;
        let second = w.run_cycle().await;

        assert_eq!(second.already_processed, 1);
        assert_eq!(w.fetcher.fetched(), vec![H1.to_string()]);
        assert_eq!(w.evaluator.calls(), 1);
        assert_eq!(w.challenger.ledger().sends().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_challenge_is_not_retried() {
        let mut ledger = FakeLedger::open();
        ledger.estimate = Err("execution reverted".to_string());
        let mut w = watcher(
            FakeRegistry::with(vec![question(1, H1, 100)]),
            FakeFetcher::new(&[(H1, "bad")]),
            ledger,
            ProcessedSet::in_memory(10),
        );

        let first = w.run_cycle().await;
        assert_eq!(first.challenge_failed, 1);
        assert!(w.processed().contains(H1));

        let second = w.run_cycle().await;
        assert_eq!(second.already_processed, 1);
        // finality check, bond read and estimate, nothing more
        assert_eq!(w.challenger.ledger().calls().len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_retried_next_cycle() {
        let mut w = watcher(
            FakeRegistry::with(vec![question(1, H1, 100)]),
            FakeFetcher::new(&[(H1, "good")]).fail_next(H1, 1),
            FakeLedger::open(),
            ProcessedSet::in_memory(10),
        );

        let first = w.run_cycle().await;
        assert_eq!(first.errors, 1);
        assert!(!w.processed().contains(H1));
        assert_eq!(w.evaluator.calls(), 0);

        let second = w.run_cycle().await;
        assert_eq!(second.good, 1);
        assert!(w.processed().contains(H1));
        assert_eq!(w.fetcher.fetched().len(), 2);
    }

    #[tokio::test]
    async fn test_evaluation_failure_leaves_hash_unprocessed() {
        let mut w = watcher(
            FakeRegistry::with(vec![question(1, H1, 100), question(2, H2, 100)]),
            FakeFetcher::new(&[(H1, "garbled"), (H2, "good")]),
            FakeLedger::open(),
            ProcessedSet::in_memory(10),
        );

        let report = w.run_cycle().await;
        assert_eq!(report.errors, 1);
        assert_eq!(report.good, 1);
        assert!(!w.processed().contains(H1));
        assert!(w.processed().contains(H2));
        assert!(w.challenger.ledger().calls().is_empty());
    }

    #[tokio::test]
    async fn test_query_failure_is_no_new_data() {
        let mut w = watcher(
            FakeRegistry::failing(),
            FakeFetcher::new(&[]),
            FakeLedger::open(),
            ProcessedSet::in_memory(10),
        );

        let report = w.run_cycle().await;
        assert!(report.query_failed);
        assert_eq!(report.polled, 0);
        assert!(w.fetcher.fetched().is_empty());
    }

    #[tokio::test]
    async fn test_question_challenged_at_most_once_per_cycle() {
        // Same question listed twice under different hashes.
        let mut w = watcher(
            FakeRegistry::with(vec![question(1, H1, 100), question(1, H2, 100)]),
            FakeFetcher::new(&[(H1, "bad"), (H2, "bad")]),
            FakeLedger::open(),
            ProcessedSet::in_memory(10),
        );

        let report = w.run_cycle().await;
        assert_eq!(report.challenged, 1);
        assert_eq!(w.challenger.ledger().sends().len(), 1);
        assert!(w.processed().contains(H1));
        assert!(w.processed().contains(H2));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_sleep_and_flushes_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_hashes.json");

        let w = watcher(
            FakeRegistry::with(vec![question(1, H1, 100)]),
            FakeFetcher::new(&[(H1, "good")]),
            FakeLedger::open(),
            ProcessedSet::open(&path, 10).unwrap(),
        );

        let (tx, rx) = broadcast::channel(1);
        tx.send(()).unwrap();

        // Poll interval is an hour; only the shutdown can end this in time.
        let processed = tokio::time::timeout(Duration::from_secs(5), w.run(rx))
            .await
            .expect("watcher did not stop on shutdown");
        assert!(processed.contains(H1));

        let reloaded = ProcessedSet::open(&path, 10).unwrap();
        assert_eq!(reloaded.iter().collect::<Vec<_>>(), vec![H1]);
    }

    #[tokio::test]
    async fn test_current_answer_already_ours_is_not_challenged() {
        let mut q = question(1, H1, 100);
        q.current_answer = Some(B256::ZERO);
        let mut w = watcher(
            FakeRegistry::with(vec![q]),
            FakeFetcher::new(&[(H1, "bad")]),
            FakeLedger::open(),
            ProcessedSet::in_memory(10),
        );

        let report = w.run_cycle().await;
        assert_eq!(report.already_answered, 1);
        assert_eq!(report.challenged, 0);
        assert!(w.processed().contains(H1));
        assert!(w.challenger.ledger().calls().is_empty());
    }

    #[tokio::test]
    async fn test_evicted_hash_does_not_trigger_second_challenge() {
        let mut w = watcher(
            FakeRegistry::with(vec![question(1, H1, 100), question(2, H2, 100)]),
            FakeFetcher::new(&[(H1, "bad"), (H2, "bad")]),
            FakeLedger::open(),
            ProcessedSet::in_memory(1),
        );

        let first = w.run_cycle().await;
        assert_eq!(first.challenged, 2);
        assert_eq!(w.challenger.ledger().sends().len(), 2);

        // Chain now carries our answer with the doubled bond.
        let mut ours = vec![question(1, H1, 200), question(2, H2, 200)];
        for q in &mut ours {
            q.current_answer = Some(B256::ZERO);
        }
        w.registry.set(ours);

        // Capacity 1: both hashes keep evicting each other and get re-evaluated.
        let second = w.run_cycle().await;
        assert_eq!(second.already_answered, 2);
        assert_eq!(second.challenged, 0);
        assert_eq!(w.fetcher.fetched().len(), 4);
        assert_eq!(w.challenger.ledger().sends().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_leaves_hash_unprocessed() {
        let mut w = watcher(
            FakeRegistry::with(vec![question(1, H1, 100)]),
            FakeFetcher::new(&[(H1, "bad")]).delayed(Duration::from_secs(60)),
            FakeLedger::open(),
            ProcessedSet::in_memory(10),
        );

        let report = w.run_cycle().await;
        assert_eq!(report.errors, 1);
        assert!(!w.processed().contains(H1));
        assert_eq!(w.evaluator.calls(), 0);
        assert!(w.challenger.ledger().calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_evaluation_timeout_leaves_hash_unprocessed() {
        let challenger = Challenger::new(FakeLedger::open(), U256::from(1_000u64), B256::ZERO);
        let mut w = Watcher::new(
            FakeRegistry::with(vec![question(1, H1, 100)]),
            FakeFetcher::new(&[(H1, "bad")]),
            FakeEvaluator::delayed(Duration::from_secs(60)),
            challenger,
            ProcessedSet::in_memory(10),
            settings(),
        );

        let report = w.run_cycle().await;
        assert_eq!(report.errors, 1);
        assert!(!w.processed().contains(H1));
        assert!(w.challenger.ledger().calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_registry_is_a_failed_query() {
        let mut w = watcher(
            FakeRegistry::hanging(),
            FakeFetcher::new(&[]),
            FakeLedger::open(),
            ProcessedSet::in_memory(10),
        );

        let report = w.run_cycle().await;
        assert!(report.query_failed);
        assert_eq!(report.polled, 0);
        assert!(w.fetcher.fetched().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_challenge_timeout_is_a_failed_challenge() {
        let mut w = Watcher::new(
            FakeRegistry::with(vec![question(1, H1, 100)]),
            FakeFetcher::new(&[(H1, "bad")]),
            FakeEvaluator::new(),
            StalledSubmitter {
                calls: Mutex::new(0),
            },
            ProcessedSet::in_memory(10),
            settings(),
        );

        let report = w.run_cycle().await;
        assert_eq!(report.challenge_failed, 1);
        assert_eq!(report.challenged, 0);
        assert!(w.processed().contains(H1));
        assert_eq!(*w.challenger.calls.lock().unwrap(), 1);

        // Recorded, so the next cycle does not try again.
        let second = w.run_cycle().await;
        assert_eq!(second.already_processed, 1);
        assert_eq!(*w.challenger.calls.lock().unwrap(), 1);
    }
}
