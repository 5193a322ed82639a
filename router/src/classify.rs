//! Request classification for routing.
//!
//! Requests are split into LONG and SHORT from a cheap length proxy instead of
//! a tokenizer: at routing time the estimate only needs to be good enough to
//! tell a chat turn from an analysis prompt.

use adasplit_common::{ChatCompletionRequest, ChatMessage, TaskClass};

use crate::config::ClassifierConfig;

/// Estimates the cost of a request from its messages.
pub trait CostEstimator: Send + Sync {
    fn estimate(&self, messages: &[ChatMessage]) -> usize;
}

/// Total content characters divided by a fixed characters-per-token ratio.
#[derive(Debug, Clone, Copy)]
pub struct CharLengthEstimator {
    pub chars_per_token: usize,
}

impl Default for CharLengthEstimator {
    fn default() -> Self {
        Self { chars_per_token: 4 }
    }
}

impl CostEstimator for CharLengthEstimator {
    fn estimate(&self, messages: &[ChatMessage]) -> usize {
        let chars: usize = messages.iter().map(ChatMessage::content_chars).sum();
        chars / self.chars_per_token.max(1)
    }
}

/// Maps an estimated cost to a [`TaskClass`].
pub struct Classifier {
    estimator: Box<dyn CostEstimator>,
    threshold: usize,
}

impl Classifier {
    pub fn new(estimator: Box<dyn CostEstimator>, threshold: usize) -> Self {
        Self { estimator, threshold }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(
            Box::new(CharLengthEstimator {
                chars_per_token: config.chars_per_token,
            }),
            config.threshold,
        )
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn estimate(&self, request: &ChatCompletionRequest) -> usize {
        self.estimator.estimate(&request.messages)
    }

    /// LONG only when the cost strictly exceeds the threshold.
    pub fn class_for_cost(&self, cost: usize) -> TaskClass {
        if cost > self.threshold {
            TaskClass::Long
        } else {
            TaskClass::Short
        }
    }

    pub fn classify(&self, request: &ChatCompletionRequest) -> TaskClass {
        self.class_for_cost(self.estimate(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn request_with_chars(n: usize) -> ChatCompletionRequest {
        ChatCompletionRequest::new(vec![ChatMessage::text("user", "x".repeat(n))])
    }

    #[rstest]
    #[case(0, 0)]
    #[case(3, 0)]
    #[case(4, 1)]
    #[case(12_000, 3000)]
    #[case(12_007, 3001)]
    fn test_char_length_estimate(#[case] chars: usize, #[case] expected: usize) {
        let estimator = CharLengthEstimator::default();
        let request = request_with_chars(chars);
        assert_eq!(estimator.estimate(&request.messages), expected);
    }

    #[rstest]
    #[case(12_000, TaskClass::Short)] // cost 3000 is not above the threshold
    #[case(12_004, TaskClass::Long)] // cost 3001
    #[case(40, TaskClass::Short)]
    #[case(28_000, TaskClass::Long)]
    fn test_classify_against_default_threshold(#[case] chars: usize, #[case] expected: TaskClass) {
        let classifier = Classifier::from_config(&ClassifierConfig::default());
        assert_eq!(classifier.classify(&request_with_chars(chars)), expected);
    }

    #[test]
    fn test_estimate_spans_all_messages() {
        let classifier = Classifier::from_config(&ClassifierConfig {
            threshold: 10,
            chars_per_token: 4,
        });
        let request = ChatCompletionRequest::new(vec![
            ChatMessage::text("system", "a".repeat(24)),
            ChatMessage::text("user", "b".repeat(24)),
        ]);
        assert_eq!(classifier.estimate(&request), 12);
        assert_eq!(classifier.classify(&request), TaskClass::Long);
    }

    #[test]
    fn test_custom_estimator() {
        struct PerMessage;
        impl CostEstimator for PerMessage {
            fn estimate(&self, messages: &[ChatMessage]) -> usize {
                messages.len() * 1000
            }
        }

        let classifier = Classifier::new(Box::new(PerMessage), 1500);
        let one = ChatCompletionRequest::new(vec![ChatMessage::text("user", "hi")]);
        let two = ChatCompletionRequest::new(vec![
            ChatMessage::text("user", "hi"),
            ChatMessage::text("user", "again"),
        ]);
        assert_eq!(classifier.classify(&one), TaskClass::Short);
        assert_eq!(classifier.classify(&two), TaskClass::Long);
    }
}
