//! The three model-driven stages of the control loop.

pub mod executor;
pub mod feedback;
pub mod planner;

/// Clip `text` to `max_chars`, marking the cut.
pub(crate) fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}\n[... clipped]")
}
