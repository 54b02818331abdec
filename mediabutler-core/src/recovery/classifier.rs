//! Maps failures onto retry policy and user guidance.

use std::path::PathBuf;

use mediabutler_model::FileHash;

use crate::error::{ButlerError, ErrorKind};

/// What the pipeline knew when the failure happened.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub operation: String,
    pub source_path: Option<PathBuf>,
    pub target_path: Option<PathBuf>,
    pub file_size: Option<u64>,
    pub available_space: Option<u64>,
    pub file_hash: Option<FileHash>,
    pub retry_attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub can_retry: bool,
    pub requires_user: bool,
    pub recommended_delay_ms: u64,
    pub max_retry_attempts: u32,
    pub confidence: f64,
    pub user_message: String,
    pub technical_details: String,
    pub resolution_steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    AutomaticRetry { delay_ms: u64 },
    WaitForUser,
    LogAndFail,
    EscalateToAdmin,
    Skip,
}

/// Policy table from error kind to recovery behavior. Stateless apart from
/// the configured backoff schedule.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    retry_delays_ms: Vec<u64>,
    max_retry: u32,
}

impl ErrorClassifier {
    pub fn new(retry_delays_ms: Vec<u64>, max_retry: u32) -> Self {
        debug_assert!(!retry_delays_ms.is_empty());
        Self {
            retry_delays_ms,
            max_retry,
        }
    }

    /// Backoff for the given attempt; the schedule's last entry repeats.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let index = (attempt as usize).min(self.retry_delays_ms.len().saturating_sub(1));
        self.retry_delays_ms.get(index).copied().unwrap_or(5_000)
    }

    pub fn classify(&self, error: &ButlerError, ctx: &ErrorContext) -> ErrorClassification {
        let kind = error.kind();
        let technical_details = format!("{error}");

        match kind {
            ErrorKind::Permission => self.terminal(
                kind,
                ctx,
                "MediaButler does not have permission to access the file or target folder."
                    .to_string(),
                technical_details,
                vec![
                    "Check ownership and permissions on the source and target directories"
                        .to_string(),
                    "Ensure the MediaButler service user can write to the library root"
                        .to_string(),
                ],
            ),
            ErrorKind::Path => self.terminal(
                kind,
                ctx,
                "The file or target path is missing or invalid.".to_string(),
                technical_details,
                vec![
                    "Verify the file still exists at its original location".to_string(),
                    "Shorten the category name if the path is too long".to_string(),
                ],
            ),
            ErrorKind::Space => {
                let detail = match (ctx.file_size, ctx.available_space) {
                    (Some(required), Some(available)) => format!(
                        "Insufficient disk space: need {required} bytes plus headroom, \
                         {available} available"
                    ),
                    _ => "Insufficient disk space on the target volume".to_string(),
                };
                self.terminal(
                    kind,
                    ctx,
                    detail,
                    technical_details,
                    vec![
                        "Free space on the library volume".to_string(),
                        "Move or delete completed downloads".to_string(),
                    ],
                )
            }
            ErrorKind::Transient => ErrorClassification {
                kind,
                can_retry: true,
                requires_user: false,
                recommended_delay_ms: self.delay_for_attempt(ctx.retry_attempts),
                max_retry_attempts: self.max_retry,
                confidence: 0.9,
                user_message: "A temporary filesystem problem interrupted the operation; it \
                               will be retried automatically."
                    .to_string(),
                technical_details,
                resolution_steps: vec![
                    "No action needed unless retries keep failing".to_string(),
                ],
            },
            ErrorKind::ClassifierTimeout => ErrorClassification {
                kind,
                can_retry: true,
                requires_user: false,
                recommended_delay_ms: self.retry_delays_ms.first().copied().unwrap_or(5_000),
                max_retry_attempts: self.max_retry,
                confidence: 0.9,
                user_message: "The classifier took too long to answer; the file will be \
                               retried."
                    .to_string(),
                technical_details,
                resolution_steps: vec![
                    "If this persists, check classifier model load and system load"
                        .to_string(),
                ],
            },
            ErrorKind::Conflict => ErrorClassification {
                kind,
                can_retry: true,
                requires_user: false,
                recommended_delay_ms: 0,
                max_retry_attempts: 1,
                confidence: 0.9,
                user_message: "Another operation updated this file at the same time."
                    .to_string(),
                technical_details,
                resolution_steps: vec!["Retry the request".to_string()],
            },
            ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::IllegalTransition => {
                ErrorClassification {
                    kind,
                    can_retry: false,
                    requires_user: true,
                    recommended_delay_ms: 0,
                    max_retry_attempts: 0,
                    confidence: 0.9,
                    user_message: "The request was rejected; see details.".to_string(),
                    technical_details,
                    resolution_steps: vec!["Correct the request and try again".to_string()],
                }
            }
            ErrorKind::Unknown => ErrorClassification {
                kind,
                can_retry: false,
                requires_user: true,
                recommended_delay_ms: 0,
                max_retry_attempts: 0,
                confidence: 0.3,
                user_message: "An unexpected error occurred.".to_string(),
                technical_details,
                resolution_steps: vec![
                    "Inspect the processing log for this file".to_string(),
                    "Reset the file to retry from the beginning".to_string(),
                ],
            },
        }
    }

    /// Derive the next move from a classification and the attempt count.
    pub fn recovery_action(
        &self,
        classification: &ErrorClassification,
        ctx: &ErrorContext,
    ) -> RecoveryAction {
        if classification.can_retry {
            if ctx.retry_attempts < classification.max_retry_attempts {
                return RecoveryAction::AutomaticRetry {
                    delay_ms: classification.recommended_delay_ms,
                };
            }
            return RecoveryAction::LogAndFail;
        }
        match classification.kind {
            // A vanished source is usually an external cleanup; skip it.
            ErrorKind::Path if ctx.source_path.is_some() => RecoveryAction::Skip,
            ErrorKind::Unknown if ctx.retry_attempts > 0 => RecoveryAction::EscalateToAdmin,
            _ if classification.requires_user => RecoveryAction::WaitForUser,
            _ => RecoveryAction::LogAndFail,
        }
    }

    fn terminal(
        &self,
        kind: ErrorKind,
        _ctx: &ErrorContext,
        user_message: String,
        technical_details: String,
        resolution_steps: Vec<String>,
    ) -> ErrorClassification {
        ErrorClassification {
            kind,
            can_retry: false,
            requires_user: true,
            recommended_delay_ms: 0,
            max_retry_attempts: 0,
            confidence: 0.9,
            user_message,
            technical_details,
            resolution_steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ErrorClassifier {
        ErrorClassifier::new(vec![5_000, 30_000, 60_000], 3)
    }

    #[test]
    fn transient_errors_back_off_exponentially() {
        let c = classifier();
        let err = ButlerError::Transient("file in use".into());

        for (attempt, expected) in [(0, 5_000), (1, 30_000), (2, 60_000), (5, 60_000)] {
            let ctx = ErrorContext {
                retry_attempts: attempt,
                ..Default::default()
            };
            let classification = c.classify(&err, &ctx);
            assert!(classification.can_retry);
            assert_eq!(classification.recommended_delay_ms, expected);
        }
    }

    #[test]
    fn space_errors_require_the_user() {
        let c = classifier();
        let err = ButlerError::Space {
            required: 5_500_000_000,
            available: 2_000_000_000,
        };
        let ctx = ErrorContext {
            file_size: Some(5_000_000_000),
            available_space: Some(2_000_000_000),
            ..Default::default()
        };
        let classification = c.classify(&err, &ctx);
        assert_eq!(classification.kind, ErrorKind::Space);
        assert!(!classification.can_retry);
        assert!(classification.requires_user);
        assert!(classification.user_message.contains("Insufficient disk space"));
        assert_eq!(
            c.recovery_action(&classification, &ctx),
            RecoveryAction::WaitForUser
        );
    }

    #[test]
    fn exhausted_retries_become_log_and_fail() {
        let c = classifier();
        let err = ButlerError::Transient("io".into());
        let ctx = ErrorContext {
            retry_attempts: 3,
            ..Default::default()
        };
        let classification = c.classify(&err, &ctx);
        assert_eq!(
            c.recovery_action(&classification, &ctx),
            RecoveryAction::LogAndFail
        );
    }

    #[test]
    fn classifier_timeout_retries_after_a_flat_delay() {
        let c = classifier();
        let err = ButlerError::ClassifierTimeout { deadline_ms: 500 };
        let ctx = ErrorContext::default();
        let classification = c.classify(&err, &ctx);
        assert_eq!(classification.kind, ErrorKind::ClassifierTimeout);
        assert_eq!(classification.recommended_delay_ms, 5_000);
        assert_eq!(
            c.recovery_action(&classification, &ctx),
            RecoveryAction::AutomaticRetry { delay_ms: 5_000 }
        );
    }
}
