//! Executor hook: how vendor executors report call outcomes.
//!
//! Executors call [`ExecutorHook::report`] (or the two `track_*` methods)
//! after every upstream call. Streaming executors wrap their response stream
//! in [`TrackedStream`] so a mid-stream failure is reported exactly once.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures::Stream;
use pin_project_lite::pin_project;
use tracing::warn;

use crate::Result;
use crate::config::Config;
use crate::failure::FailureTracker;

/// Provider identifiers whose tracker vendor name differs, or which are
/// listed so the full set of known providers is explicit.
const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("openai-compat", "openai-compatibility"),
    ("vertex", "vertex"),
    ("gemini", "gemini"),
    ("gemini-cli", "gemini-cli"),
    ("claude", "claude"),
    ("codex", "codex"),
    ("qwen", "qwen"),
    ("aistudio", "aistudio"),
    ("antigravity", "antigravity"),
    ("iflow", "iflow"),
];

/// Maps executor provider identifiers to canonical vendor names, and model
/// aliases to upstream model names.
#[derive(Debug, Clone)]
pub struct VendorAliases {
    aliases: HashMap<String, String>,
    models: HashMap<String, String>,
}

impl Default for VendorAliases {
    fn default() -> Self {
        Self::builtin()
    }
}

impl VendorAliases {
    /// Built-in provider table
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            aliases: BUILTIN_ALIASES
                .iter()
                .map(|(from, to)| ((*from).to_string(), (*to).to_string()))
                .collect(),
            models: HashMap::new(),
        }
    }

    /// Built-in table extended (and overridden) by `vendor_aliases`, plus
    /// every model alias declared in `vendors`
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let mut aliases = Self::builtin();
        aliases.aliases.extend(
            config
                .vendor_aliases
                .iter()
                .map(|(from, to)| (from.clone(), to.clone())),
        );
        aliases.models = config
            .vendors
            .iter()
            .flat_map(|v| &v.models)
            .filter_map(|m| m.alias.as_deref())
            .map(|alias| (alias.to_string(), config.upstream_model(alias).to_string()))
            .collect();
        aliases
    }

    /// Canonical vendor name for `provider`; unknown providers map to
    /// themselves.
    #[must_use]
    pub fn normalize<'a>(&'a self, provider: &'a str) -> &'a str {
        self.aliases.get(provider).map_or(provider, String::as_str)
    }

    /// Upstream model name for `model`; names that are not an alias map to
    /// themselves.
    #[must_use]
    pub fn normalize_model<'a>(&'a self, model: &'a str) -> &'a str {
        self.models.get(model).map_or(model, String::as_str)
    }
}

/// Callback surface handed to vendor executors.
///
/// Provider and model are normalized before reaching the tracker, so the
/// pair is keyed the same way the router queries it. Reporting never fails
/// the request: tracker errors are logged and dropped.
#[derive(Clone, Default)]
pub struct ExecutorHook {
    tracker: Option<Arc<dyn FailureTracker>>,
    aliases: Arc<VendorAliases>,
}

impl ExecutorHook {
    /// Hook reporting to `tracker` with the built-in alias table
    #[must_use]
    pub fn new(tracker: Arc<dyn FailureTracker>) -> Self {
        Self {
            tracker: Some(tracker),
            aliases: Arc::new(VendorAliases::builtin()),
        }
    }

    /// Hook that reports nowhere
    #[must_use]
    pub fn detached() -> Self {
        Self::default()
    }

    /// Replace the alias table
    #[must_use]
    pub fn with_aliases(mut self, aliases: VendorAliases) -> Self {
        self.aliases = Arc::new(aliases);
        self
    }

    /// Canonical vendor name for `provider`
    #[must_use]
    pub fn vendor_name<'a>(&'a self, provider: &'a str) -> &'a str {
        self.aliases.normalize(provider)
    }

    /// Report a failed upstream call
    pub fn track_failure(&self, provider: &str, model: &str) {
        let Some(tracker) = &self.tracker else {
            return;
        };
        let vendor = self.vendor_name(provider);
        let model = self.aliases.normalize_model(model);
        if let Err(e) = tracker.track_failure(vendor, model) {
            warn!(vendor = %vendor, model = %model, error = %e, "Failed to record failure");
        }
    }

    /// Report a successful upstream call
    pub fn track_success(&self, provider: &str, model: &str) {
        let Some(tracker) = &self.tracker else {
            return;
        };
        let vendor = self.vendor_name(provider);
        let model = self.aliases.normalize_model(model);
        if let Err(e) = tracker.track_success(vendor, model) {
            warn!(vendor = %vendor, model = %model, error = %e, "Failed to record success");
        }
    }

    /// Report the outcome of a call
    pub fn report<T, E>(&self, provider: &str, model: &str, outcome: &std::result::Result<T, E>) {
        match outcome {
            Ok(_) => self.track_success(provider, model),
            Err(_) => self.track_failure(provider, model),
        }
    }

    /// Whether the pair is currently auto-disabled.
    ///
    /// # Errors
    ///
    /// Propagates tracker errors.
    pub fn is_model_disabled(&self, provider: &str, model: &str) -> Result<bool> {
        match &self.tracker {
            Some(tracker) => tracker.is_disabled(
                self.vendor_name(provider),
                self.aliases.normalize_model(model),
            ),
            None => Ok(false),
        }
    }

    /// Wrap a response stream so its outcome is reported once
    #[must_use]
    pub fn track_stream<S>(&self, provider: &str, model: &str, stream: S) -> TrackedStream<S> {
        TrackedStream {
            inner: stream,
            hook: self.clone(),
            provider: provider.to_string(),
            model: model.to_string(),
            finished: false,
        }
    }
}

pin_project! {
    /// Stream wrapper that reports the first `Err` item as a failure and
    /// clean exhaustion as a success.
    ///
    /// The stream ends right after yielding an error. Dropping it before the
    /// end reports nothing.
    pub struct TrackedStream<S> {
        #[pin]
        inner: S,
        hook: ExecutorHook,
        provider: String,
        model: String,
        finished: bool,
    }
}

impl<S, T, E> Stream for TrackedStream<S>
where
    S: Stream<Item = std::result::Result<T, E>>,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.finished {
            return Poll::Ready(None);
        }

        match ready!(this.inner.poll_next(cx)) {
            Some(Ok(item)) => Poll::Ready(Some(Ok(item))),
            Some(Err(e)) => {
                *this.finished = true;
                this.hook.track_failure(this.provider, this.model);
                Poll::Ready(Some(Err(e)))
            }
            None => {
                *this.finished = true;
                this.hook.track_success(this.provider, this.model);
                Poll::Ready(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use futures::stream;

    use super::*;
    use crate::failure::MockFailureTracker;

    fn hook_with(mock: &Arc<MockFailureTracker>) -> ExecutorHook {
        ExecutorHook::new(Arc::clone(mock) as Arc<dyn FailureTracker>)
    }

    #[test]
    fn builtin_aliases_normalize_openai_compat() {
        let aliases = VendorAliases::builtin();
        assert_eq!(aliases.normalize("openai-compat"), "openai-compatibility");
        assert_eq!(aliases.normalize("gemini-cli"), "gemini-cli");
        assert_eq!(aliases.normalize("my-custom"), "my-custom");
    }

    #[test]
    fn config_aliases_extend_builtin() {
        let mut config = Config::default();
        config
            .vendor_aliases
            .insert("anthropic".to_string(), "claude".to_string());
        config
            .vendor_aliases
            .insert("openai-compat".to_string(), "openai".to_string());

        let aliases = VendorAliases::from_config(&config);
        assert_eq!(aliases.normalize("anthropic"), "claude");
        assert_eq!(aliases.normalize("openai-compat"), "openai");
        assert_eq!(aliases.normalize("qwen"), "qwen");
    }

    #[test]
    fn report_dispatches_on_outcome_under_canonical_vendor() {
        let mock = Arc::new(MockFailureTracker::new());
        let hook = hook_with(&mock);

        let failed: std::result::Result<(), &str> = Err("502");
        hook.report("openai-compat", "gpt-4", &failed);
        hook.report("openai-compat", "gpt-4", &failed);
        assert_eq!(mock.failure_count("openai-compatibility", "gpt-4").unwrap(), 2);
        assert_eq!(mock.failure_count("openai-compat", "gpt-4").unwrap(), 0);

        hook.report("openai-compat", "gpt-4", &Ok::<_, &str>(()));
        assert_eq!(mock.failure_count("openai-compatibility", "gpt-4").unwrap(), 0);
    }

    #[test]
    fn model_alias_tracked_under_upstream_name() {
        // GIVEN: a config where `sonnet` aliases `claude-3-sonnet`
        let yaml = r"
vendors:
  - name: claude
    models:
      - name: claude-3-sonnet
        alias: sonnet
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let mock = Arc::new(MockFailureTracker::new());
        let hook = hook_with(&mock).with_aliases(VendorAliases::from_config(&config));

        // WHEN: an executor reports under the alias
        hook.track_failure("claude", "sonnet");
        hook.track_failure("claude", "claude-3-sonnet");

        // THEN: both land on the pair the router queries
        assert_eq!(mock.failure_count("claude", "claude-3-sonnet").unwrap(), 2);
        assert_eq!(mock.failure_count("claude", "sonnet").unwrap(), 0);

        mock.set_disabled("claude", "claude-3-sonnet", true);
        assert!(hook.is_model_disabled("claude", "sonnet").unwrap());
    }

    #[test]
    fn tracker_errors_do_not_propagate() {
        let mock = Arc::new(MockFailureTracker::new());
        mock.fail_with(Some("down"));
        let hook = hook_with(&mock);

        // Must not panic
        hook.track_failure("claude", "claude-3-opus");
        hook.track_success("claude", "claude-3-opus");
        assert!(hook.is_model_disabled("claude", "claude-3-opus").is_err());
    }

    #[test]
    fn detached_hook_is_inert() {
        let hook = ExecutorHook::detached();
        hook.track_failure("claude", "claude-3-opus");
        assert!(!hook.is_model_disabled("claude", "claude-3-opus").unwrap());
    }

    #[test]
    fn is_model_disabled_uses_canonical_vendor() {
        let mock = Arc::new(MockFailureTracker::new());
        mock.set_disabled("openai-compatibility", "gpt-4", true);
        let hook = hook_with(&mock);
        assert!(hook.is_model_disabled("openai-compat", "gpt-4").unwrap());
    }

    #[tokio::test]
    async fn stream_error_reported_once_and_ends_stream() {
        // GIVEN: a stream with a chunk, an error, then more items
        let mock = Arc::new(MockFailureTracker::new());
        let hook = hook_with(&mock);
        let inner = stream::iter(vec![Ok(1), Err("reset"), Ok(2), Err("again")]);

        // WHEN: draining the tracked stream
        let items: Vec<_> = hook.track_stream("claude", "claude-3-opus", inner).collect().await;

        // THEN: it stops at the first error, counted once
        assert_eq!(items, vec![Ok(1), Err("reset")]);
        assert_eq!(mock.failure_count("claude", "claude-3-opus").unwrap(), 1);
    }

    #[tokio::test]
    async fn clean_stream_reports_success() {
        let mock = Arc::new(MockFailureTracker::new());
        mock.set_failure_count("claude", "claude-3-opus", 3);
        let hook = hook_with(&mock);
        let inner = stream::iter(vec![Ok::<_, &str>("a"), Ok("b")]);

        let items: Vec<_> = hook.track_stream("claude", "claude-3-opus", inner).collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(mock.failure_count("claude", "claude-3-opus").unwrap(), 0);
    }

    #[tokio::test]
    async fn dropped_stream_reports_nothing() {
        let mock = Arc::new(MockFailureTracker::new());
        mock.set_failure_count("claude", "claude-3-opus", 3);
        let hook = hook_with(&mock);
        let inner = stream::iter(vec![Ok::<_, &str>(1), Ok(2), Ok(3)]);

        let mut tracked = hook.track_stream("claude", "claude-3-opus", inner);
        assert_eq!(tracked.next().await, Some(Ok(1)));
        drop(tracked);

        assert_eq!(mock.failure_count("claude", "claude-3-opus").unwrap(), 3);
    }
}
