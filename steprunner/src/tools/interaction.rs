//! Tools that involve the human: `ask_user` and the consent-gated `web_search`.

use anyhow::Result;
use tracing::{info, warn};

use super::ToolOutcome;
use crate::core::types::{ToolCall, ToolInvocationResult};
use crate::io::human::{InputKind, Question, Reply, parse_yes_no};
use crate::io::run_state::RunState;
use crate::runtime::Runtime;

pub fn ask_user(rt: &Runtime<'_>, call: &ToolCall, reason: &str) -> Result<ToolOutcome> {
    let question = Question::new(
        InputKind::AskUser,
        format!("The agent needs your input.\nReason: {reason}\nWhat would you like me to do?"),
    );
    Ok(match rt.human.ask(&question)? {
        Reply::Answer(answer) => ToolOutcome::Done(ToolInvocationResult::new(call, answer)),
        Reply::Pending => ToolOutcome::Suspended(question),
    })
}

/// Search the web once the human has allowed it for this run.
pub fn web_search(
    rt: &Runtime<'_>,
    state: &mut RunState,
    call: &ToolCall,
    query: &str,
) -> Result<ToolOutcome> {
    if !rt.search.is_configured() {
        return Ok(ToolOutcome::Done(ToolInvocationResult::new(
            call,
            "Web search is not configured; continue without it.",
        )));
    }
    let allowed = match state.search_consent {
        Some(allowed) => allowed,
        None => {
            let question = Question::new(
                InputKind::SearchConsent,
                format!(
                    "The agent wants to search the web for: {query}\nAllow web search for this run? (yes/no)"
                ),
            );
            let allowed = loop {
                match rt.human.ask(&question)? {
                    Reply::Pending => return Ok(ToolOutcome::Suspended(question)),
                    Reply::Answer(answer) => match parse_yes_no(&answer) {
                        Some(allowed) => break allowed,
                        None => warn!(answer = %answer, "expected yes or no"),
                    },
                }
            };
            info!(allowed, "web search consent recorded");
            state.search_consent = Some(allowed);
            allowed
        }
    };
    if !allowed {
        return Ok(ToolOutcome::Done(ToolInvocationResult::new(
            call,
            "The user did not allow web search for this run.",
        )));
    }
    let text = match rt.search.search(query) {
        Ok(results) => results,
        Err(err) => format!("An error occurred while searching: {err:#}"),
    };
    Ok(ToolOutcome::Done(ToolInvocationResult::new(call, text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Harness, ScriptedHuman};

    fn search_call() -> ToolCall {
        ToolCall::WebSearch {
            query: "django login view".to_string(),
        }
    }

    #[test]
    fn unconfigured_search_answers_inline_without_asking() {
        let harness = Harness::new();
        let mut state = harness.run_state("run-search");
        let human = ScriptedHuman::default();
        let outcome = harness
            .with_runtime(&human, |rt| {
                web_search(rt, &mut state, &search_call(), "django login view")
            })
            .expect("search");
        let ToolOutcome::Done(result) = outcome else {
            panic!("expected inline result");
        };
        assert!(result.output_text.contains("not configured"));
        assert!(human.asked().is_empty());
    }

    /// Verifies consent is asked once (re-asking on unclear answers) and remembered for the run.
    #[test]
    fn consent_is_asked_once_per_run() {
        let mut harness = Harness::new();
        harness.search.answer = Some("use LoginView".to_string());
        let mut state = harness.run_state("run-search");
        let human = ScriptedHuman::new(vec![
            Reply::Answer("maybe".to_string()),
            Reply::Answer("yes".to_string()),
        ]);

        let (first, second) = harness.with_runtime(&human, |rt| {
            let first = web_search(rt, &mut state, &search_call(), "django login view")
                .expect("first search");
            let second = web_search(rt, &mut state, &search_call(), "django logout view")
                .expect("second search");
            (first, second)
        });
        assert_eq!(state.search_consent, Some(true));
        assert_eq!(human.asked().len(), 2);
        let ToolOutcome::Done(first) = first else {
            panic!("expected result");
        };
        assert_eq!(first.output_text, "django login view: use LoginView");
        assert!(matches!(second, ToolOutcome::Done(_)));
    }

    #[test]
    fn pending_consent_suspends() {
        let mut harness = Harness::new();
        harness.search.answer = Some("anything".to_string());
        let mut state = harness.run_state("run-search");
        let outcome = harness
            .with_runtime(&ScriptedHuman::default(), |rt| {
                web_search(rt, &mut state, &search_call(), "django login view")
            })
            .expect("search");
        let ToolOutcome::Suspended(question) = outcome else {
            panic!("expected suspension");
        };
        assert_eq!(question.kind, InputKind::SearchConsent);
        assert_eq!(state.search_consent, None);
    }

    #[test]
    fn denied_consent_skips_the_search() {
        let mut harness = Harness::new();
        harness.search.answer = Some("anything".to_string());
        let mut state = harness.run_state("run-search");
        let human = ScriptedHuman::new(vec![Reply::Answer("no".to_string())]);
        let outcome = harness
            .with_runtime(&human, |rt| {
                web_search(rt, &mut state, &search_call(), "django login view")
            })
            .expect("search");
        let ToolOutcome::Done(result) = outcome else {
            panic!("expected inline result");
        };
        assert!(result.output_text.contains("did not allow"));
        assert_eq!(state.search_consent, Some(false));
    }
}
