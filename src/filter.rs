use serde::{Deserialize, Serialize};

use crate::types::{Item, RunState, WorkspaceId};

// ---------------------------------------------------------------------------
// Filter criteria
// ---------------------------------------------------------------------------

/// The query that defines the filtered collection a listing shows.
///
/// Sent verbatim to the service for "all except" dispatches so it can
/// re-resolve the collection server-side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterCriteria {
    /// Free-text substring matched against the item name.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<WorkspaceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<RunState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Restrict the collection to managed items.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub managed_only: bool,
}

impl FilterCriteria {
    /// Parse a query string, extracting structured prefixes.
    ///
    /// Supported prefixes:
    /// - `workspace:3`
    /// - `project:12`
    /// - `state:active,paused` (repeatable)
    /// - `is:archived` / `is:unarchived`
    /// - `is:managed`
    /// - `user:alice`
    ///
    /// Unrecognised or malformed prefixed tokens fall through to free text.
    pub fn parse(query: &str) -> Self {
        let mut result = Self::default();
        let mut text_parts = Vec::new();

        for token in query.split_whitespace() {
            if let Some(val) = token.strip_prefix("workspace:")
                && let Ok(id) = val.parse::<u32>()
            {
                result.workspace_id = Some(WorkspaceId(id));
            } else if let Some(val) = token.strip_prefix("project:")
                && let Ok(id) = val.parse::<u64>()
            {
                result.project_id = Some(id);
            } else if let Some(val) = token.strip_prefix("state:")
                && let Some(states) = parse_states(val)
            {
                for state in states {
                    if !result.states.contains(&state) {
                        result.states.push(state);
                    }
                }
            } else if let Some(val) = token.strip_prefix("user:")
                && !val.is_empty()
            {
                result.owner = Some(val.to_lowercase());
            } else if let Some(val) = token.strip_prefix("is:") {
                match val.to_lowercase().as_str() {
                    "archived" => result.archived = Some(true),
                    "unarchived" => result.archived = Some(false),
                    "managed" => result.managed_only = true,
                    _ => text_parts.push(token),
                }
            } else {
                text_parts.push(token);
            }
        }

        result.text = text_parts.join(" ");
        result
    }

    /// Whether `item` belongs to the collection this query defines.
    pub fn matches(&self, item: &Item) -> bool {
        if let Some(ws) = self.workspace_id
            && item.workspace_id != ws
        {
            return false;
        }
        if let Some(project) = self.project_id
            && item.project_id != Some(project)
        {
            return false;
        }
        if !self.states.is_empty() && !self.states.contains(&item.state) {
            return false;
        }
        if let Some(archived) = self.archived
            && item.archived != archived
        {
            return false;
        }
        if let Some(owner) = &self.owner
            && !item.owner.eq_ignore_ascii_case(owner)
        {
            return false;
        }
        if self.managed_only && !item.managed {
            return false;
        }
        if !self.text.is_empty() && !item.name.to_lowercase().contains(&self.text.to_lowercase())
        {
            return false;
        }
        true
    }
}

/// Parse `active,paused`; any unknown name rejects the whole token.
fn parse_states(val: &str) -> Option<Vec<RunState>> {
    val.split(',')
        .filter(|s| !s.is_empty())
        .map(RunState::from_query)
        .collect::<Option<Vec<_>>>()
        .filter(|states| !states.is_empty())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
