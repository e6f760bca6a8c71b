//! Prompt rendering for the planner, executor and feedback calls and the file tools.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::Environment;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const PLAN_REVISION_TEMPLATE: &str = include_str!("prompts/plan_revision.md");
const EXECUTOR_TEMPLATE: &str = include_str!("prompts/executor.md");
const FEEDBACK_TEMPLATE: &str = include_str!("prompts/feedback.md");
const EDIT_FILE_TEMPLATE: &str = include_str!("prompts/edit_file.md");
const FILE_SUMMARY_TEMPLATE: &str = include_str!("prompts/file_summary.md");

/// Droppable sections in the order they are sacrificed for budget.
const DROP_ORDER: [&str; 7] = [
    "tree",
    "project",
    "executed",
    "recent",
    "history",
    "environment",
    "request",
];

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker regex is valid")
});

#[derive(Debug, Serialize)]
pub struct PlannerPrompt<'a> {
    pub request: &'a str,
    pub project: &'a str,
    pub has_image: bool,
}

#[derive(Debug, Serialize)]
pub struct RevisionPrompt<'a> {
    pub request: &'a str,
    pub project: &'a str,
    pub feedback: &'a str,
    /// Pretty JSON of the plan under review.
    pub previous_plan: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ExecutorPrompt<'a> {
    pub request: &'a str,
    pub step: &'a str,
    pub working_directory: &'a str,
    pub session: &'a str,
    pub project_id: &'a str,
    pub history: &'a str,
    pub tree: &'a str,
    pub trace: &'a str,
    pub max_calls: u32,
    pub calls_left: u32,
}

#[derive(Debug, Serialize)]
pub struct FeedbackPrompt<'a> {
    pub request: &'a str,
    pub step: &'a str,
    pub result: &'a str,
    /// Pretty JSON of the steps after the current one.
    pub remaining: &'a str,
    pub executed: &'a str,
    pub recent: &'a str,
    /// Rolling summary of every step run so far.
    pub history: &'a str,
    pub working_directory: &'a str,
}

#[derive(Debug, Serialize)]
pub struct FileRewritePrompt<'a> {
    pub path: &'a str,
    pub instructions: &'a str,
    pub exists: bool,
    pub existing: &'a str,
}

#[derive(Debug, Serialize)]
pub struct FileSummaryPrompt<'a> {
    pub path: &'a str,
    pub content: &'a str,
    pub tree: &'a str,
}

/// Renders templates and fits them into a byte budget.
pub struct PromptBuilder {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("planner", PLANNER_TEMPLATE)?;
        env.add_template("plan_revision", PLAN_REVISION_TEMPLATE)?;
        env.add_template("executor", EXECUTOR_TEMPLATE)?;
        env.add_template("feedback", FEEDBACK_TEMPLATE)?;
        env.add_template("edit_file", EDIT_FILE_TEMPLATE)?;
        env.add_template("file_summary", FILE_SUMMARY_TEMPLATE)?;
        Ok(Self { env, budget_bytes })
    }

    pub fn planner(&self, input: &PlannerPrompt<'_>) -> Result<String> {
        self.render_budgeted("planner", input)
    }

    pub fn plan_revision(&self, input: &RevisionPrompt<'_>) -> Result<String> {
        self.render_budgeted("plan_revision", input)
    }

    pub fn executor(&self, input: &ExecutorPrompt<'_>) -> Result<String> {
        self.render_budgeted("executor", input)
    }

    pub fn feedback(&self, input: &FeedbackPrompt<'_>) -> Result<String> {
        self.render_budgeted("feedback", input)
    }

    /// File rewrites are never truncated; a clipped file would be written back clipped.
    pub fn file_rewrite(&self, input: &FileRewritePrompt<'_>) -> Result<String> {
        let rendered = self.env.get_template("edit_file")?.render(input)?;
        Ok(render_sections(&parse_sections(&rendered)))
    }

    pub fn file_summary(&self, input: &FileSummaryPrompt<'_>) -> Result<String> {
        self.render_budgeted("file_summary", input)
    }

    fn render_budgeted<S: Serialize>(&self, name: &str, input: &S) -> Result<String> {
        let rendered = self.env.get_template(name)?.render(input)?;
        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        let prompt = render_sections(&sections);
        debug!(template = name, bytes = prompt.len(), "rendered prompt");
        Ok(prompt)
    }
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers.
///
/// Empty droppable sections are omitted.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<(usize, usize, String, bool)> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?.as_str().to_string();
            let required = caps.get(2)?.as_str() == "required";
            Some((whole.start(), whole.end(), key, required))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (_, end, key, required)) in markers.iter().enumerate() {
        let stop = markers
            .get(i + 1)
            .map(|next| next.0)
            .unwrap_or(rendered.len());
        let content = rendered[*end..stop].trim().to_string();
        if *required || has_body(&content) {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

/// A section whose only line is its heading carries no information.
fn has_body(content: &str) -> bool {
    content
        .lines()
        .skip_while(|line| line.starts_with("### "))
        .any(|line| !line.trim().is_empty())
}

fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    if total_len(sections) <= budget {
        return;
    }

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let other_len: usize = sections
        .iter()
        .take(sections.len().saturating_sub(1))
        .map(|s| s.content.len())
        .sum();
    if let Some(last) = sections.last_mut()
        && other_len + last.content.len() > budget
    {
        let allowed = budget.saturating_sub(other_len);
        let before_len = last.content.len();
        let marker = "\n[truncated]";
        let keep = floor_char_boundary(&last.content, allowed.saturating_sub(marker.len()));
        last.content.truncate(keep);
        if allowed > marker.len() {
            last.content.push_str(marker);
        }
        debug!(
            section = last.key,
            before_len,
            after_len = last.content.len(),
            "truncated section for budget"
        );
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    (0..=index).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor_input<'a>(history: &'a str, tree: &'a str) -> ExecutorPrompt<'a> {
        ExecutorPrompt {
            request: "add a health endpoint",
            step: "Create app/health.py",
            working_directory: "/srv/shop",
            session: "shop-000001",
            project_id: "shop",
            history,
            tree,
            trace: "",
            max_calls: 25,
            calls_left: 25,
        }
    }

    /// Verifies executor prompt sections appear in template order.
    #[test]
    fn executor_sections_are_ordered() {
        let builder = PromptBuilder::new(100_000).expect("builder");
        let prompt = builder
            .executor(&executor_input("- Setup: done", "/srv/shop\n└── app/"))
            .expect("render");
        let contract = prompt.find("### Executor Contract").expect("contract");
        let step = prompt.find("### Current Step").expect("step");
        let env = prompt.find("### Environment").expect("environment");
        let history = prompt.find("### Earlier Steps").expect("history");
        let tree = prompt.find("### Directory Tree").expect("tree");
        let trace = prompt.find("### Tool Calls So Far").expect("trace");
        assert!(contract < step && step < env && env < history);
        assert!(history < tree && tree < trace);
        assert!(prompt.contains("None yet."));
        assert!(!prompt.contains("<!--"));
    }

    #[test]
    fn empty_droppable_sections_are_omitted() {
        let builder = PromptBuilder::new(100_000).expect("builder");
        let prompt = builder.executor(&executor_input("", "")).expect("render");
        assert!(!prompt.contains("### Earlier Steps"));
        assert!(!prompt.contains("### Directory Tree"));
    }

    /// Verifies a tight budget drops the tree before history and keeps required sections.
    #[test]
    fn budget_drops_tree_first() {
        let builder = PromptBuilder::new(3_000).expect("builder");
        let tree = "├── file.rs\n".repeat(400);
        let prompt = builder
            .executor(&executor_input("- Setup: done", &tree))
            .expect("render");
        assert!(!prompt.contains("### Directory Tree"));
        assert!(prompt.contains("### Earlier Steps"));
        assert!(prompt.contains("### Current Step"));
    }

    #[test]
    fn file_rewrite_is_never_truncated() {
        let builder = PromptBuilder::new(10).expect("builder");
        let existing = "x = 1\n".repeat(100);
        let prompt = builder
            .file_rewrite(&FileRewritePrompt {
                path: "app.py",
                instructions: "rename x to y",
                exists: true,
                existing: &existing,
            })
            .expect("render");
        assert!(prompt.contains(existing.trim_end()));
        assert!(prompt.contains("The current code is:"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut sections = vec![ParsedSection {
            key: "trace".to_string(),
            required: true,
            content: "é".repeat(50),
        }];
        apply_budget_to_sections(&mut sections, 31);
        assert!(sections[0].content.ends_with("[truncated]"));
        assert!(sections[0].content.len() <= 31);
    }
}
