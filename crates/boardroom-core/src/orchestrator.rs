//! Round orchestration
//!
//! Runs the fixed two-round script over the three provider adapters and
//! reports progress as [`BoardroomEvent`]s. Round 1 may fan out in parallel;
//! round 2 is always sequential because each step reads earlier output.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::{ProviderAdapter, ProviderSet};
use crate::error::{BoardroomError, BoardroomResult};
use crate::prompts::{system_prompt, user_prompt};
use crate::types::{CompletionRequest, Generation, Increment, ProviderId, Round, RoundContext, Source, Step};

/// How round-1 calls are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyPolicy {
    /// Every step waits for the previous one
    Sequential,
    /// Round 1 fans out, round 2 stays sequential
    #[default]
    Parallel,
}

impl std::fmt::Display for ConcurrencyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
        }
    }
}

/// Progress of a boardroom run
#[derive(Debug, Clone, PartialEq)]
pub enum BoardroomEvent {
    StepStarted { step: Step },
    Increment { step: Step, increment: Increment },
    StepCompleted { step: Step, generation: Generation },
    Complete { transcript: Transcript },
}

/// Final output of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: Step,
    pub text: String,
    pub source: Source,
}

/// Output of a completed run: the six step results in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub prompt: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<StepResult>,
}

impl Transcript {
    /// Final answer: the last step's text
    pub fn final_answer(&self) -> Option<&str> {
        self.results.last().map(|r| r.text.as_str())
    }

    pub fn fallback_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.source == Source::Fallback)
            .count()
    }
}

/// The round orchestrator
#[derive(Debug, Clone)]
pub struct Boardroom {
    providers: ProviderSet,
    policy: ConcurrencyPolicy,
}

impl Boardroom {
    pub fn new(providers: ProviderSet, policy: ConcurrencyPolicy) -> Self {
        Self { providers, policy }
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    pub fn policy(&self) -> ConcurrencyPolicy {
        self.policy
    }

    /// Run all six steps for `prompt`.
    ///
    /// Adapter failures are absorbed as fallback text. Only an empty prompt,
    /// cancellation or a crashed step task abort the run.
    pub async fn run(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
        events: &mpsc::UnboundedSender<BoardroomEvent>,
    ) -> BoardroomResult<Transcript> {
        if prompt.trim().is_empty() {
            return Err(BoardroomError::EmptyPrompt);
        }

        info!(
            "Boardroom run started ({} chars, policy={})",
            prompt.len(),
            self.policy
        );
        let started_at = Utc::now();
        let mut ctx = RoundContext::new(prompt);
        let mut results = Vec::with_capacity(Step::ORDER.len());

        let initial = match self.policy {
            ConcurrencyPolicy::Sequential => self.round_one_sequential(&mut ctx, cancel, events).await?,
            ConcurrencyPolicy::Parallel => self.round_one_parallel(&mut ctx, cancel, events).await?,
        };
        results.extend(initial);

        for provider in ProviderId::ALL {
            let step = Step::new(Round::Refinement, provider);
            let generation = self.step(step, &ctx, cancel, events).await?;
            ctx.record(Round::Refinement, provider, generation.text.clone());
            results.push(complete_step(step, generation, events));
        }

        let transcript = Transcript {
            prompt: prompt.to_string(),
            started_at,
            finished_at: Utc::now(),
            results,
        };

        info!(
            "Boardroom run complete in {}ms ({} fallback steps, final answer {} chars)",
            (transcript.finished_at - transcript.started_at).num_milliseconds(),
            transcript.fallback_count(),
            transcript.final_answer().map_or(0, str::len)
        );
        let _ = events.send(BoardroomEvent::Complete {
            transcript: transcript.clone(),
        });
        Ok(transcript)
    }

    async fn round_one_sequential(
        &self,
        ctx: &mut RoundContext,
        cancel: &CancellationToken,
        events: &mpsc::UnboundedSender<BoardroomEvent>,
    ) -> BoardroomResult<Vec<StepResult>> {
        let mut results = Vec::with_capacity(3);
        for provider in ProviderId::ALL {
            let step = Step::new(Round::Initial, provider);
            let generation = self.step(step, ctx, cancel, events).await?;
            ctx.record(Round::Initial, provider, generation.text.clone());
            results.push(complete_step(step, generation, events));
        }
        Ok(results)
    }

    /// Fan out the three independent round-1 calls, then fan in in order
    async fn round_one_parallel(
        &self,
        ctx: &mut RoundContext,
        cancel: &CancellationToken,
        events: &mpsc::UnboundedSender<BoardroomEvent>,
    ) -> BoardroomResult<Vec<StepResult>> {
        // Cancelling this token stops the siblings of a failed step
        // without touching the caller's token.
        let round_token = cancel.child_token();

        let handles: Vec<(Step, JoinHandle<BoardroomResult<Generation>>)> = ProviderId::ALL
            .into_iter()
            .map(|provider| {
                let step = Step::new(Round::Initial, provider);
                let adapter = self.providers.get(provider).clone();
                let request = step_request(step, ctx);
                let token = round_token.clone();
                let tx = events.clone();
                let handle = tokio::spawn(async move {
                    run_adapter(adapter, step, request, token, tx).await
                });
                (step, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(3);
        for (step, handle) in handles {
            let generation = match handle.await {
                Ok(Ok(generation)) => generation,
                Ok(Err(e)) => {
                    round_token.cancel();
                    return Err(e);
                }
                Err(e) => {
                    warn!("Step {} task failed: {}", step, e);
                    round_token.cancel();
                    return Err(BoardroomError::StepFailed {
                        step: step.id().to_string(),
                        reason: e.to_string(),
                    });
                }
            };
            ctx.record(Round::Initial, step.provider, generation.text.clone());
            results.push(complete_step(step, generation, events));
        }
        Ok(results)
    }

    async fn step(
        &self,
        step: Step,
        ctx: &RoundContext,
        cancel: &CancellationToken,
        events: &mpsc::UnboundedSender<BoardroomEvent>,
    ) -> BoardroomResult<Generation> {
        if cancel.is_cancelled() {
            return Err(BoardroomError::Cancelled);
        }
        let adapter = self.providers.get(step.provider).clone();
        run_adapter(
            adapter,
            step,
            step_request(step, ctx),
            cancel.clone(),
            events.clone(),
        )
        .await
    }
}

fn step_request(step: Step, ctx: &RoundContext) -> CompletionRequest {
    CompletionRequest::new(
        system_prompt(step.provider, step.round),
        user_prompt(step.provider, step.round, ctx),
        step.round,
    )
    .with_question(ctx.prompt.clone())
}

async fn run_adapter(
    adapter: Arc<ProviderAdapter>,
    step: Step,
    request: CompletionRequest,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<BoardroomEvent>,
) -> BoardroomResult<Generation> {
    debug!("Step {} started", step);
    let _ = events.send(BoardroomEvent::StepStarted { step });
    adapter
        .generate(&request, &cancel, |increment| {
            let _ = events.send(BoardroomEvent::Increment { step, increment });
        })
        .await
}

fn complete_step(
    step: Step,
    generation: Generation,
    events: &mpsc::UnboundedSender<BoardroomEvent>,
) -> StepResult {
    debug!("Step {} completed ({})", step, generation.source);
    let result = StepResult {
        step,
        text: generation.text.clone(),
        source: generation.source,
    };
    let _ = events.send(BoardroomEvent::StepCompleted { step, generation });
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::tests::Scripted;
    use crate::adapter::{AdapterMode, AdapterOptions};
    use crate::providers::{LlmProvider, TextStream};
    use anyhow::Result;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Upstream that answers with a fixed text and records its prompts and concurrency
    struct Recording {
        text: &'static str,
        prompts: Arc<Mutex<Vec<String>>>,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LlmProvider for Recording {
        fn provider_name(&self) -> &str {
            "recording"
        }

        fn model(&self) -> &str {
            "recording-1"
        }

        async fn complete(&self, _system: &str, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(self.text.to_string())
        }

        async fn stream(&self, system: &str, prompt: &str) -> Result<TextStream> {
            let text = self.complete(system, prompt).await?;
            Ok(futures_util::stream::iter(vec![Ok(text)]).boxed())
        }
    }

    struct Harness {
        boardroom: Boardroom,
        prompts: [Arc<Mutex<Vec<String>>>; 3],
        peak: Arc<AtomicUsize>,
    }

    fn harness(policy: ConcurrencyPolicy) -> Harness {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let prompts: [Arc<Mutex<Vec<String>>>; 3] = Default::default();
        let texts = ["gpt answer", "claude answer", "gemini answer"];
        let options = AdapterOptions {
            mode: AdapterMode::Single,
            timeout: Duration::from_secs(5),
            mock_word_delay: Duration::ZERO,
        };
        let providers = ProviderSet::from_fn(|id| {
            let upstream = Recording {
                text: texts[id.index()],
                prompts: prompts[id.index()].clone(),
                in_flight: in_flight.clone(),
                peak: peak.clone(),
            };
            ProviderAdapter::new(id, Arc::new(upstream), options)
        });
        Harness {
            boardroom: Boardroom::new(providers, policy),
            prompts,
            peak,
        }
    }

    async fn run(boardroom: &Boardroom, prompt: &str) -> (BoardroomResult<Transcript>, Vec<BoardroomEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = boardroom.run(prompt, &CancellationToken::new(), &tx).await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (result, events)
    }

    fn position(events: &[BoardroomEvent], wanted: impl Fn(&BoardroomEvent) -> bool) -> usize {
        events.iter().position(wanted).unwrap()
    }

    #[tokio::test]
    async fn test_sequential_steps_never_overlap() {
        let h = harness(ConcurrencyPolicy::Sequential);
        let (result, events) = run(&h.boardroom, "What day is it?").await;
        let transcript = result.unwrap();

        assert_eq!(h.peak.load(Ordering::SeqCst), 1);
        let steps: Vec<Step> = transcript.results.iter().map(|r| r.step).collect();
        assert_eq!(steps, Step::ORDER);

        for pair in Step::ORDER.windows(2) {
            let done = position(&events, |e| {
                matches!(e, BoardroomEvent::StepCompleted { step, .. } if *step == pair[0])
            });
            let final_inc = position(&events, |e| {
                matches!(e, BoardroomEvent::Increment { step, increment } if *step == pair[0] && increment.is_final)
            });
            let next = position(&events, |e| {
                matches!(e, BoardroomEvent::StepStarted { step } if *step == pair[1])
            });
            assert!(final_inc < next);
            assert!(done < next);
        }
        assert!(matches!(events.last(), Some(BoardroomEvent::Complete { .. })));
    }

    #[tokio::test]
    async fn test_parallel_round_one_overlaps() {
        let h = harness(ConcurrencyPolicy::Parallel);
        let (result, events) = run(&h.boardroom, "What day is it?").await;
        let transcript = result.unwrap();

        assert!(h.peak.load(Ordering::SeqCst) >= 2);
        assert_eq!(transcript.results.len(), 6);

        let completed: Vec<Step> = events
            .iter()
            .filter_map(|e| match e {
                BoardroomEvent::StepCompleted { step, .. } => Some(*step),
                _ => None,
            })
            .collect();
        assert_eq!(completed, Step::ORDER);

        let last_r1 = position(&events, |e| {
            matches!(e, BoardroomEvent::StepCompleted { step, .. } if step.id() == "gemini")
        });
        let first_r2 = position(&events, |e| {
            matches!(e, BoardroomEvent::StepStarted { step } if step.round == Round::Refinement)
        });
        assert!(last_r1 < first_r2);
    }

    #[tokio::test]
    async fn test_round_two_prompts_carry_round_one_outputs() {
        let h = harness(ConcurrencyPolicy::Parallel);
        let (result, _) = run(&h.boardroom, "What day is it?").await;
        result.unwrap();

        let gpt = h.prompts[0].lock().unwrap().clone();
        assert_eq!(gpt[0], "What day is it?");
        assert!(gpt[1].contains("claude answer"));
        assert!(gpt[1].contains("gemini answer"));

        let claude = h.prompts[1].lock().unwrap().clone();
        assert!(claude[1].contains("gpt answer"));
        assert!(claude[1].contains("gemini answer"));

        let gemini = h.prompts[2].lock().unwrap().clone();
        assert!(gemini[1].contains("gpt answer"));
        assert!(gemini[1].contains("claude answer"));
    }

    #[tokio::test]
    async fn test_round_one_gets_the_prompt_verbatim() {
        let h = harness(ConcurrencyPolicy::Sequential);
        let prompt = "  What day is it?\n";
        let (result, _) = run(&h.boardroom, prompt).await;
        let transcript = result.unwrap();

        assert_eq!(transcript.prompt, prompt);
        for prompts in &h.prompts {
            assert_eq!(prompts.lock().unwrap()[0], prompt);
        }
    }

    #[tokio::test]
    async fn test_all_upstreams_failing_yields_fallback_transcript() {
        let options = AdapterOptions {
            mode: AdapterMode::Stream,
            timeout: Duration::from_secs(5),
            mock_word_delay: Duration::ZERO,
        };
        let providers = ProviderSet::from_fn(|id| {
            let failing = Scripted {
                deltas: vec!["unused"],
                fail_after: Some(0),
                delay: Duration::ZERO,
            };
            ProviderAdapter::new(id, Arc::new(failing), options)
        });
        let boardroom = Boardroom::new(providers, ConcurrencyPolicy::Sequential);
        let (result, _) = run(&boardroom, "What day is it?").await;
        let transcript = result.unwrap();

        assert_eq!(transcript.fallback_count(), 6);
        for r in &transcript.results {
            assert!(r.text.contains("What day is it?"), "{}", r.text);
        }
    }

    #[tokio::test]
    async fn test_empty_prompt_is_rejected() {
        let boardroom = Boardroom::new(ProviderSet::mock(Duration::ZERO), ConcurrencyPolicy::Parallel);
        let (result, events) = run(&boardroom, "   ").await;
        assert_eq!(result, Err(BoardroomError::EmptyPrompt));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let boardroom = Boardroom::new(ProviderSet::mock(Duration::ZERO), ConcurrencyPolicy::Parallel);
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = boardroom.run("hello", &cancel, &tx).await;
        assert_eq!(result, Err(BoardroomError::Cancelled));
    }

    #[tokio::test]
    async fn test_mock_transcript() {
        let boardroom = Boardroom::new(ProviderSet::mock(Duration::ZERO), ConcurrencyPolicy::Parallel);
        let (result, _) = run(&boardroom, "hello").await;
        let transcript = result.unwrap();
        assert_eq!(transcript.prompt, "hello");
        let last = transcript.results.last().unwrap();
        assert_eq!(last.step, Step::new(Round::Refinement, ProviderId::Gemini));
        assert_eq!(transcript.final_answer(), Some(last.text.as_str()));
        assert!(last.text.contains("Final Answer"));
    }
}
