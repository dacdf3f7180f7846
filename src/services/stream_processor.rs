//! Stream processor.
//!
//! Consumes generation events for one task, buffers streamed text, resolves
//! early embeds on flush and publishes the results. Text emitted plus the
//! tail put back into the buffer always reconstructs what was buffered.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use tracing::{debug, instrument, warn};

use crate::domain::errors::TransportError;
use crate::domain::models::a2a::{Artifact, FileContent, Part};
use crate::domain::models::generation::ARTIFACT_RETURN_STATE_PREFIX;
use crate::domain::models::{ArtifactHandlingMode, ArtifactRef, ContentPart, GenerationEvent};
use crate::domain::ports::{ArtifactScope, ArtifactStore, LoadedArtifact};
use crate::services::embeds::{resolve_early_embeds, EmbedResolution, EmbedSignal};
use crate::services::outbound::{OutboundPublisher, STATUS_SIGNAL};
use crate::services::task_registry::TaskExecutionContext;

/// What a single flush produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Resolved text taken out of the buffer (published or aggregated)
    pub text: String,
    /// Unprocessed tail put back into the buffer
    pub retained: String,
    /// Status texts extracted from embeds
    pub status_signals: Vec<String>,
    /// Artifacts queued for return
    pub artifact_signals: Vec<ArtifactRef>,
}

/// Resolve embeds, degrading to pass-through on any resolution error.
pub fn resolve_or_passthrough(buffer: &str) -> EmbedResolution {
    match resolve_early_embeds(buffer) {
        Ok(resolution) => resolution,
        Err(e) => {
            warn!(error = %e, "Embed resolution failed; passing text through unmodified");
            EmbedResolution::passthrough(buffer)
        }
    }
}

/// Turns runtime events into status updates, resolving early embeds on the way.
pub struct StreamProcessor {
    publisher: Arc<OutboundPublisher>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    batching_threshold_bytes: i64,
    artifact_mode: ArtifactHandlingMode,
}

impl StreamProcessor {
    /// Processor without artifact support. A threshold of 0 flushes every delta.
    pub fn new(publisher: Arc<OutboundPublisher>, batching_threshold_bytes: i64) -> Self {
        Self {
            publisher,
            artifacts: None,
            batching_threshold_bytes,
            artifact_mode: ArtifactHandlingMode::Ignore,
        }
    }

    /// Enable artifact return in `mode`.
    pub fn with_artifact_store(
        mut self,
        store: Arc<dyn ArtifactStore>,
        mode: ArtifactHandlingMode,
    ) -> Self {
        self.artifacts = Some(store);
        self.artifact_mode = mode;
        self
    }

    /// Handle one generation event.
    ///
    /// # Errors
    /// Returns the first publish failure; buffer state stays consistent.
    #[instrument(skip(self, ctx, event), fields(task_id = ctx.task_id(), partial = event.is_partial))]
    pub async fn process_event(
        &self,
        ctx: &TaskExecutionContext,
        event: &GenerationEvent,
    ) -> Result<(), TransportError> {
        if event.is_partial {
            self.on_partial(ctx, event).await
        } else {
            self.on_final(ctx, event).await
        }
    }

    async fn on_partial(
        &self,
        ctx: &TaskExecutionContext,
        event: &GenerationEvent,
    ) -> Result<(), TransportError> {
        let task = ctx.task();
        if !task.is_streaming && !task.is_run_based() {
            return Ok(());
        }

        let should_flush = {
            let mut state = ctx.lock().await;
            let mut appended = false;
            for text in event.texts() {
                state.streaming_buffer.push_str(text);
                appended = true;
            }
            if appended {
                state.turn_streamed = true;
            }
            self.batching_threshold_bytes <= 0
                || state.streaming_buffer.len() as i64 >= self.batching_threshold_bytes
        };

        if should_flush {
            self.flush(ctx, false).await?;
        }
        Ok(())
    }

    async fn on_final(
        &self,
        ctx: &TaskExecutionContext,
        event: &GenerationEvent,
    ) -> Result<(), TransportError> {
        let task = ctx.task();
        let streams_text = task.is_streaming || task.is_run_based();

        {
            let mut state = ctx.lock().await;
            // a turn without partials carries its whole text on the final event
            if streams_text && !state.turn_streamed {
                for text in event.texts() {
                    state.streaming_buffer.push_str(text);
                }
            }
            state.turn_streamed = false;
            state.last_event = Some(event.clone());
            for artifact in artifact_return_triggers(event) {
                state.artifact_signals.push_back(artifact.clone());
                state.record_produced_artifact(artifact);
            }
        }

        self.flush(ctx, true).await?;
        self.return_artifacts(ctx).await?;

        let parts: Vec<Part> = event
            .content_parts
            .iter()
            .filter(|part| !(streams_text && part.is_text()))
            .map(content_part_to_wire)
            .collect();
        if parts.is_empty() {
            return Ok(());
        }

        let mut metadata = Map::new();
        metadata.insert("invocation_id".to_string(), json!(event.invocation_id));
        self.publisher.publish_status(task, parts, metadata).await
    }

    /// Flush the streaming buffer.
    ///
    /// On a non-final flush the unresolved tail goes back into the buffer; on
    /// the final flush it is appended verbatim to the emitted text. Resolved
    /// text is published before any status signal from the same flush.
    pub async fn flush(
        &self,
        ctx: &TaskExecutionContext,
        is_final: bool,
    ) -> Result<FlushOutcome, TransportError> {
        let task = ctx.task();
        let mut outcome = FlushOutcome::default();

        {
            let mut state = ctx.lock().await;
            if state.streaming_buffer.is_empty() {
                return Ok(outcome);
            }
            let buffer = std::mem::take(&mut state.streaming_buffer);
            let resolution = resolve_or_passthrough(&buffer);
            let tail = &buffer[resolution.processed_until..];

            outcome.text = resolution.text;
            if is_final {
                outcome.text.push_str(tail);
            } else {
                outcome.retained = tail.to_string();
                state.streaming_buffer.push_str(tail);
            }

            for signal in resolution.signals {
                match signal {
                    EmbedSignal::Status(text) => outcome.status_signals.push(text),
                    EmbedSignal::ArtifactReturn(artifact) => {
                        state.artifact_signals.push_back(artifact.clone());
                        state.record_produced_artifact(artifact.clone());
                        outcome.artifact_signals.push(artifact);
                    }
                }
            }

            if task.is_run_based() {
                state.run_based_buffer.push_str(&outcome.text);
            }
        }

        debug!(
            emitted = outcome.text.len(),
            retained = outcome.retained.len(),
            signals = outcome.status_signals.len() + outcome.artifact_signals.len(),
            is_final,
            "Buffer flushed"
        );

        if !task.is_run_based() && !outcome.text.is_empty() {
            self.publisher
                .publish_status(task, vec![Part::text(outcome.text.clone())], Map::new())
                .await?;
        }
        for text in &outcome.status_signals {
            self.publisher
                .publish_signal(task, STATUS_SIGNAL, text)
                .await?;
        }
        Ok(outcome)
    }

    /// Drain queued artifact signals and publish each artifact per the handling mode.
    async fn return_artifacts(&self, ctx: &TaskExecutionContext) -> Result<(), TransportError> {
        let queued: Vec<ArtifactRef> = ctx.lock().await.artifact_signals.drain(..).collect();
        if queued.is_empty() || self.artifact_mode == ArtifactHandlingMode::Ignore {
            return Ok(());
        }
        let Some(store) = &self.artifacts else {
            warn!(count = queued.len(), "Artifacts queued for return but no artifact store configured");
            return Ok(());
        };

        let task = ctx.task();
        let scope = ArtifactScope::new(
            self.publisher.agent_name(),
            &task.session.user_id,
            &task.session.effective_session_id,
        );
        for artifact in queued {
            let loaded = match store.load(&scope, &artifact.filename, artifact.version).await {
                Ok(Some(loaded)) => loaded,
                Ok(None) => {
                    warn!(filename = %artifact.filename, version = ?artifact.version, "Returned artifact not found");
                    continue;
                }
                Err(e) => {
                    warn!(filename = %artifact.filename, error = %e, "Failed to load returned artifact");
                    continue;
                }
            };
            let file = self.file_content(&scope, loaded);
            self.publisher
                .publish_artifact(
                    task,
                    Artifact {
                        name: file.name.clone(),
                        parts: vec![Part::File { file }],
                    },
                )
                .await?;
        }
        Ok(())
    }

    fn file_content(&self, scope: &ArtifactScope, loaded: LoadedArtifact) -> FileContent {
        let (bytes, uri) = match self.artifact_mode {
            ArtifactHandlingMode::Embed => (Some(BASE64.encode(&loaded.bytes)), None),
            ArtifactHandlingMode::Reference | ArtifactHandlingMode::Ignore => (
                None,
                Some(format!(
                    "artifact://{}/{}/{}/{}?version={}",
                    scope.app_name, scope.user_id, scope.session_id, loaded.filename, loaded.version
                )),
            ),
        };
        FileContent {
            name: loaded.filename,
            mime_type: loaded.mime_type,
            bytes,
            uri,
        }
    }
}

/// Artifacts a tool queued for return through the event's state delta.
fn artifact_return_triggers(event: &GenerationEvent) -> Vec<ArtifactRef> {
    let mut triggers: Vec<ArtifactRef> = event
        .state_delta
        .iter()
        .filter_map(|(key, value)| {
            let filename = key.strip_prefix(ARTIFACT_RETURN_STATE_PREFIX)?;
            let version = match value {
                Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
                Value::Object(map) => map
                    .get("version")
                    .and_then(Value::as_u64)
                    .and_then(|v| u32::try_from(v).ok()),
                _ => None,
            };
            Some(ArtifactRef::new(filename, version))
        })
        .collect();
    triggers.sort_by(|a, b| a.filename.cmp(&b.filename));
    triggers
}

/// Wire form of a runtime content part.
pub fn content_part_to_wire(part: &ContentPart) -> Part {
    match part {
        ContentPart::Text { text } => Part::text(text.clone()),
        ContentPart::FunctionCall { id, name, args } => Part::data(json!({
            "type": "function_call",
            "id": id,
            "name": name,
            "args": args,
        })),
        ContentPart::FunctionResponse { id, name, response } => Part::data(json!({
            "type": "function_response",
            "id": id,
            "name": name,
            "response": response,
        })),
        ContentPart::Data { data } => Part::data(data.clone()),
    }
}
