//! Shared fixtures for orchestrator tests: a scripted generation capability,
//! a repository that fails on demand, and a small run request.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use draftsman_core::capability::{
    CapabilityError, GenerationCapability, GenerationPurpose, GenerationRequest,
    InMemorySourceRepository, SourceRepository,
};
use draftsman_core::domain::{
    RunConfig, RunRequest, ScoredSource, SourceMetadata, SourceRecord, UpstreamRetryPolicy,
    WordRange,
};
use draftsman_core::Orchestrator;
use draftsman_state::fakes::MemoryCheckpointStore;
use draftsman_state::CheckpointStore;
use tokio::sync::watch;

pub type Reply = Result<String, CapabilityError>;

pub const QUESTIONS_JSON: &str = r#"{"questions": [
    {"text": "How does battery storage reduce grid costs?", "target_sections": []},
    {"text": "Which policies accelerate solar adoption?", "target_sections": []},
    {"text": "What risks limit renewable deployment?", "target_sections": []}
]}"#;

/// Covers every question above and cites `s1` verbatim. 33 words.
pub const PASSING_DRAFT: &str = "Battery storage can reduce grid costs when operators shift load away from expensive peaks [s1: \"Battery storage lowered peak demand charges\"]. Public policies accelerate solar adoption, yet several risks limit renewable deployment across regional markets and remain unresolved today.";

/// Same prose as [`PASSING_DRAFT`], citing a source that does not exist.
pub fn unresolved_draft() -> String {
    PASSING_DRAFT.replace("[s1:", "[s9:")
}

pub fn sources() -> Vec<SourceRecord> {
    vec![
        SourceRecord {
            source_id: "s1".to_string(),
            spans: vec!["Battery storage lowered peak demand charges by twenty percent.".to_string()],
            metadata: SourceMetadata {
                authors: vec!["Ada Lovelace".to_string(), "Grace Hopper".to_string()],
                year: Some(2021),
                title: "Storage economics on the distribution grid".to_string(),
                venue: Some("Energy Policy".to_string()),
                ..Default::default()
            },
        },
        SourceRecord {
            source_id: "s2".to_string(),
            spans: vec!["Feed-in tariffs accelerated rooftop solar adoption.".to_string()],
            metadata: SourceMetadata {
                authors: vec!["Alan Turing".to_string()],
                year: Some(2019),
                title: "Solar policy instruments".to_string(),
                ..Default::default()
            },
        },
    ]
}

pub fn request(template: &[&str], max_retries: u32) -> RunRequest {
    let mut config = RunConfig::with_max_retries(max_retries);
    config.word_range = WordRange::new(20, 400);
    config.upstream = UpstreamRetryPolicy {
        max_attempts: 3,
        base_delay_ms: 10,
        max_delay_ms: 40,
    };
    RunRequest {
        topic: "Economics of grid-scale battery storage".to_string(),
        template: template.iter().map(|s| s.to_string()).collect(),
        config,
    }
}

// ---------------------------------------------------------------------------
// Scripted generation
// ---------------------------------------------------------------------------

/// Replies in order; the last reply repeats once the script runs out.
#[derive(Debug, Clone)]
struct Script {
    replies: Vec<Reply>,
    calls: usize,
}

impl Script {
    fn new(replies: Vec<Reply>) -> Self {
        assert!(!replies.is_empty(), "script needs at least one reply");
        Self { replies, calls: 0 }
    }

    fn next(&mut self) -> Reply {
        let reply = self.replies[self.calls.min(self.replies.len() - 1)].clone();
        self.calls += 1;
        reply
    }
}

pub struct ScriptedGenerator {
    questions: Mutex<Script>,
    drafts: Mutex<HashMap<usize, Script>>,
    requests: Mutex<Vec<GenerationRequest>>,
    transient_failures: AtomicU32,
    cancel_on_draft: Mutex<Option<(usize, watch::Sender<bool>)>>,
}

impl ScriptedGenerator {
    /// Valid questions, and [`PASSING_DRAFT`] for every section.
    pub fn new() -> Self {
        Self {
            questions: Mutex::new(Script::new(vec![Ok(QUESTIONS_JSON.to_string())])),
            drafts: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            transient_failures: AtomicU32::new(0),
            cancel_on_draft: Mutex::new(None),
        }
    }

    pub fn with_questions(self, replies: Vec<Reply>) -> Self {
        *self.questions.lock().unwrap() = Script::new(replies);
        self
    }

    pub fn with_drafts(self, section: usize, drafts: Vec<String>) -> Self {
        self.drafts
            .lock()
            .unwrap()
            .insert(section, Script::new(drafts.into_iter().map(Ok).collect()));
        self
    }

    /// Fail the next `n` calls of any kind with `unavailable`.
    pub fn failing_first(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Trigger `tx` while serving the `nth` (1-based) draft request.
    pub fn cancel_on_draft(self, nth: usize, tx: watch::Sender<bool>) -> Self {
        *self.cancel_on_draft.lock().unwrap() = Some((nth, tx));
        self
    }

    pub fn draft_requests(&self, section: usize) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.section_index == Some(section))
            .cloned()
            .collect()
    }

    pub fn draft_calls(&self, section: usize) -> usize {
        self.draft_requests(section).len()
    }

    pub fn question_calls(&self) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.purpose == GenerationPurpose::ResearchQuestions)
            .count()
    }
}

#[async_trait]
impl GenerationCapability for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, CapabilityError> {
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(CapabilityError::Unavailable("model overloaded".to_string()));
        }

        self.requests.lock().unwrap().push(request.clone());
        match request.purpose {
            GenerationPurpose::ResearchQuestions => self.questions.lock().unwrap().next(),
            GenerationPurpose::SectionDraft => {
                let total = self
                    .requests
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|r| r.purpose == GenerationPurpose::SectionDraft)
                    .count();
                if let Some((nth, tx)) = self.cancel_on_draft.lock().unwrap().as_ref() {
                    if *nth == total {
                        tx.send_replace(true);
                    }
                }
                let section = request.section_index.unwrap_or_default();
                match self.drafts.lock().unwrap().get_mut(&section) {
                    Some(script) => script.next(),
                    None => Ok(PASSING_DRAFT.to_string()),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Flaky repository
// ---------------------------------------------------------------------------

/// In-memory repository whose first calls fail with `unavailable`.
pub struct FlakySources {
    inner: InMemorySourceRepository,
    query_failures: AtomicU32,
    get_failures: AtomicU32,
}

impl FlakySources {
    pub fn new(records: Vec<SourceRecord>) -> Self {
        Self {
            inner: InMemorySourceRepository::new(records),
            query_failures: AtomicU32::new(0),
            get_failures: AtomicU32::new(0),
        }
    }

    pub fn failing_queries(self, n: u32) -> Self {
        self.query_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn failing_gets(self, n: u32) -> Self {
        self.get_failures.store(n, Ordering::SeqCst);
        self
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SourceRepository for FlakySources {
    async fn query(&self, query: &str, top_k: usize) -> Result<Vec<ScoredSource>, CapabilityError> {
        if Self::take_failure(&self.query_failures) {
            return Err(CapabilityError::Unavailable("index warming up".to_string()));
        }
        self.inner.query(query, top_k).await
    }

    async fn get(&self, source_id: &str) -> Result<Option<SourceRecord>, CapabilityError> {
        if Self::take_failure(&self.get_failures) {
            return Err(CapabilityError::Request("connection reset".to_string()));
        }
        self.inner.get(source_id).await
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct Harness {
    pub generator: Arc<ScriptedGenerator>,
    pub store: Arc<MemoryCheckpointStore>,
    pub orchestrator: Orchestrator,
}

pub fn harness(generator: ScriptedGenerator) -> Harness {
    harness_with(generator, Arc::new(FlakySources::new(sources())), Arc::new(MemoryCheckpointStore::new()))
}

pub fn harness_with(
    generator: ScriptedGenerator,
    sources: Arc<dyn SourceRepository>,
    store: Arc<MemoryCheckpointStore>,
) -> Harness {
    let generator = Arc::new(generator);
    let orchestrator = Orchestrator::new(
        sources,
        Arc::clone(&generator) as Arc<dyn GenerationCapability>,
        Arc::clone(&store) as Arc<dyn CheckpointStore>,
    );
    Harness {
        generator,
        store,
        orchestrator,
    }
}
