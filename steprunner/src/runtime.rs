//! Collaborators shared by the agents and tools of one run.

use crate::io::config::RunnerConfig;
use crate::io::events::EventSink;
use crate::io::human::HumanChannel;
use crate::io::model::StructuredModel;
use crate::io::project::ProjectStore;
use crate::io::prompt::PromptBuilder;
use crate::io::search::SearchProvider;
use crate::io::terminal::SessionManager;

/// Borrowed handles to everything a run talks to.
pub struct Runtime<'a> {
    pub config: &'a RunnerConfig,
    pub model: &'a StructuredModel<'a>,
    pub prompts: &'a PromptBuilder,
    pub terminal: &'a SessionManager,
    pub human: &'a dyn HumanChannel,
    pub search: &'a dyn SearchProvider,
    pub projects: &'a dyn ProjectStore,
    pub events: &'a dyn EventSink,
}
