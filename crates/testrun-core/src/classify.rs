//! Result classification and outcome messages.

use std::time::Duration;

use crate::framework::{ExitCodePolicy, Framework};
use crate::record::CapturedOutput;
use crate::status::OutcomeStatus;

/// Longest stream tail quoted in a failure message, in characters.
const MESSAGE_TAIL_CHARS: usize = 2000;

/// Map a finished process onto an outcome.
///
/// A timed-out run is TIMEOUT regardless of its exit code. A process that
/// ended without an exit code (killed by a signal) is an ERROR.
pub fn classify(policy: &ExitCodePolicy, exit_code: Option<i32>, timed_out: bool) -> OutcomeStatus {
    if timed_out {
        return OutcomeStatus::Timeout;
    }
    match exit_code {
        Some(code) => policy.interpret(code),
        None => OutcomeStatus::Error,
    }
}

/// Human-readable summary for a classified run.
pub fn outcome_message(
    framework: Framework,
    test_identifier: &str,
    status: OutcomeStatus,
    exit_code: Option<i32>,
    output: &CapturedOutput,
    deadline: Duration,
) -> String {
    match status {
        OutcomeStatus::Passed => format!("Test '{}' passed", test_identifier),
        OutcomeStatus::Timeout => {
            format!("Test execution timeout ({} seconds)", deadline.as_secs())
        }
        OutcomeStatus::Failed => {
            let code = exit_code.unwrap_or_default();
            match framework {
                Framework::Robot => format!("Test failed with return code {}", code),
                Framework::Playwright => format!(
                    "Test failed with exit code {}: {}",
                    code,
                    tail(&output.stderr, MESSAGE_TAIL_CHARS)
                ),
                Framework::Pytest => format!(
                    "Test failed with exit code {}:\n{}",
                    code,
                    tail(&output.stdout, MESSAGE_TAIL_CHARS)
                ),
            }
        }
        OutcomeStatus::Error => match exit_code {
            Some(code) => format!("{} exited with unrecognized code {}", framework, code),
            None => format!("{} terminated without an exit code", framework),
        },
    }
}

/// Last `max_chars` characters of `text`, trimmed.
fn tail(text: &str, max_chars: usize) -> &str {
    let text = text.trim();
    match text.char_indices().rev().nth(max_chars.saturating_sub(1)) {
        Some((idx, _)) if max_chars > 0 => &text[idx..],
        _ => text,
    }
}
