//! Planner: request -> ordered steps, with a human accept/revise loop.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::types::{PlanResponse, Step};
use crate::io::human::{InputKind, Question, Reply, parse_yes_no};
use crate::io::model::Contract;
use crate::io::prompt::{PlannerPrompt, RevisionPrompt};
use crate::runtime::Runtime;

/// What the planner works from.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub request: &'a str,
    /// Project summary and directory tree.
    pub project: &'a str,
    pub image: Option<&'a Path>,
    pub workdir: &'a Path,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanningOutcome {
    Accepted(Vec<Step>),
    /// Waiting for the reviewer; the draft is kept by the caller.
    Suspended(Question),
}

/// One structured call turning the request into steps.
#[instrument(skip_all)]
pub fn draft_plan(rt: &Runtime<'_>, req: &PlanRequest<'_>) -> Result<Vec<Step>> {
    let prompt = rt.prompts.planner(&PlannerPrompt {
        request: req.request,
        project: req.project,
        has_image: req.image.is_some(),
    })?;
    let response: PlanResponse =
        rt.model
            .invoke(Contract::Plan, &prompt, req.workdir, req.image)?;
    info!(steps = response.steps.len(), "drafted plan");
    Ok(renumber(response.steps))
}

/// Re-plan from the previous draft and the reviewer's feedback.
#[instrument(skip_all)]
pub fn revise_plan(
    rt: &Runtime<'_>,
    req: &PlanRequest<'_>,
    previous: &[Step],
    feedback: &str,
) -> Result<Vec<Step>> {
    let previous_plan = serde_json::to_string_pretty(previous).context("serialize plan")?;
    let prompt = rt.prompts.plan_revision(&RevisionPrompt {
        request: req.request,
        project: req.project,
        feedback,
        previous_plan: &previous_plan,
    })?;
    let response: PlanResponse = rt
        .model
        .invoke(Contract::Plan, &prompt, req.workdir, None)?;
    info!(steps = response.steps.len(), "revised plan");
    Ok(renumber(response.steps))
}

/// Draft (unless a draft is carried over) and loop until the reviewer accepts.
///
/// `yes` accepts; any other non-empty answer is treated as revision feedback.
/// On suspension the current draft is left in `draft`.
pub fn plan_with_review(
    rt: &Runtime<'_>,
    req: &PlanRequest<'_>,
    draft: &mut Option<Vec<Step>>,
) -> Result<PlanningOutcome> {
    let mut steps = match draft.take() {
        Some(steps) => steps,
        None => draft_plan(rt, req)?,
    };
    loop {
        let question = Question::new(InputKind::PlanReview, review_prompt(&steps));
        let answer = match rt.human.ask(&question)? {
            Reply::Pending => {
                *draft = Some(steps);
                return Ok(PlanningOutcome::Suspended(question));
            }
            Reply::Answer(answer) => answer,
        };
        let answer = answer.trim();
        match parse_yes_no(answer) {
            Some(true) => {
                info!(steps = steps.len(), "plan accepted");
                return Ok(PlanningOutcome::Accepted(steps));
            }
            Some(false) => debug!("plan rejected without feedback; asking again"),
            None if answer.is_empty() => debug!("empty review answer; asking again"),
            None => steps = revise_plan(rt, req, &steps, answer)?,
        }
    }
}

fn renumber(mut steps: Vec<Step>) -> Vec<Step> {
    for (i, step) in steps.iter_mut().enumerate() {
        step.order = i;
    }
    steps
}

/// Human-readable plan followed by the review instructions.
pub fn review_prompt(steps: &[Step]) -> String {
    let mut buf = String::from("Proposed plan:\n");
    if steps.is_empty() {
        buf.push_str("(no steps)\n");
    }
    for (i, step) in steps.iter().enumerate() {
        buf.push_str(&format!("\n{}. {}\n", i + 1, step.title));
        for line in step.describe().lines().skip(1) {
            if line.trim().is_empty() {
                continue;
            }
            buf.push_str(&format!("   {line}\n"));
        }
    }
    buf.push_str("\nType 'yes' to accept this plan, or describe what should change.");
    buf
}
