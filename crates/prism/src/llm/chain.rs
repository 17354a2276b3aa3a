use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};

use super::{Completion, CompletionRequest, LanguageModel, LlmError};

/// Ordered failover across providers. The first success wins.
#[derive(Clone, Default)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn LanguageModel>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn LanguageModel>>) -> Self {
        Self { providers }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }
}

#[async_trait]
impl LanguageModel for ProviderChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        if self.providers.is_empty() {
            return Err(LlmError::NotConfigured);
        }

        let mut failures = Vec::new();
        for provider in &self.providers {
            match provider.complete(request).await {
                Ok(completion) => {
                    if !failures.is_empty() {
                        info!(
                            "Provider '{}' answered after {} failure(s)",
                            provider.name(),
                            failures.len()
                        );
                    }
                    return Ok(completion);
                }
                Err(e) => {
                    warn!("Provider '{}' failed: {}", provider.name(), e);
                    failures.push(format!("{}: {}", provider.name(), e));
                }
            }
        }
        Err(LlmError::AllProvidersFailed(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TokenUsage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        name: &'static str,
        reply: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, reply: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Some(text) => Ok(Completion {
                    text: text.to_string(),
                    provider: self.name.to_string(),
                    usage: TokenUsage::default(),
                }),
                None => Err(LlmError::Api {
                    status: 503,
                    message: "overloaded".into(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_falls_over_to_next_provider() {
        let first = Scripted::new("first", None);
        let second = Scripted::new("second", Some("ok"));
        let third = Scripted::new("third", Some("unused"));
        let chain = ProviderChain::new(vec![first.clone(), second.clone(), third.clone()]);

        let completion = chain.complete(&CompletionRequest::new("s", "p")).await.unwrap();
        assert_eq!(completion.provider, "second");
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(third.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_fail() {
        let chain = ProviderChain::new(vec![Scripted::new("a", None), Scripted::new("b", None)]);
        let err = chain.complete(&CompletionRequest::new("s", "p")).await.unwrap_err();
        match err {
            LlmError::AllProvidersFailed(failures) => assert_eq!(failures.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_chain_is_not_configured() {
        let err = ProviderChain::default()
            .complete(&CompletionRequest::new("s", "p"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::NotConfigured));
    }
}
