use std::collections::BTreeSet;

use relay_types::actions::SessionAction;
use relay_types::{ChatId, Destination};

use crate::dispatch::DispatchReport;

/// Text plus rows of buttons, independent of how the platform draws them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    pub buttons: Vec<Vec<PromptButton>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptButton {
    pub label: String,
    pub action: SessionAction,
}

impl PromptButton {
    fn new(label: impl Into<String>, action: SessionAction) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

impl Prompt {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: vec![],
        }
    }

    /// Selection prompt: one toggle button per destination, then the bulk
    /// actions, then send.
    pub fn selection(destinations: &[Destination], selected: &BTreeSet<ChatId>) -> Self {
        let chosen = destinations.iter().filter(|d| selected.contains(&d.id)).count();
        let text = format!(
            "Where should this message be reposted?\n\
             Tap the groups to toggle them, then press Send.\n\n\
             Selected: {} of {}",
            chosen,
            destinations.len()
        );

        let mut buttons: Vec<Vec<PromptButton>> = destinations
            .iter()
            .map(|d| {
                let mark = if selected.contains(&d.id) { "✅" } else { "⬜" };
                vec![PromptButton::new(
                    format!("{} {}", mark, d.display_name),
                    SessionAction::Toggle(d.id),
                )]
            })
            .collect();

        // Selected ids that have left the registry since; listed so they can be unticked
        for id in selected.iter().filter(|id| !destinations.iter().any(|d| d.id == **id)) {
            buttons.push(vec![PromptButton::new(
                format!("✅ {} (removed)", id),
                SessionAction::Toggle(*id),
            )]);
        }

        buttons.push(vec![
            PromptButton::new("Select all", SessionAction::SelectAll),
            PromptButton::new("Clear", SessionAction::Clear),
        ]);
        buttons.push(vec![PromptButton::new("📤 Send", SessionAction::Send)]);

        Self { text, buttons }
    }

    /// Final prompt once a session is closed: the summary, no buttons.
    pub fn report(report: &DispatchReport) -> Self {
        Self::text_only(report.summary())
    }
}
