//! Action catalog - the closed set of action types and their descriptors
//!
//! Every action type belongs to exactly one [`Phase`]. Phases give the plan a
//! coarse order and bound dependency edges: an action may only depend on
//! actions of the same or an earlier phase.

use crate::error::{CompilationError, ValidationError};
use crate::model::Action;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coarse ordering bucket for actions
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Container creation and settings
    Setup,
    /// Bulk git content push
    Content,
    /// Labels and milestones
    Metadata,
    /// Issues, pull requests and their comments
    Entities,
    /// Webhooks, workflows, secrets
    Integrations,
    /// LFS objects, releases and release assets
    LargeObjects,
    /// Collaborators and branch protection
    Governance,
    /// Archive bundles and read-only archival
    Preservation,
}

impl Phase {
    /// All phases in execution order
    pub const ALL: [Self; 8] = [
        Self::Setup,
        Self::Content,
        Self::Metadata,
        Self::Entities,
        Self::Integrations,
        Self::LargeObjects,
        Self::Governance,
        Self::Preservation,
    ];

    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Content => "content",
            Self::Metadata => "metadata",
            Self::Entities => "entities",
            Self::Integrations => "integrations",
            Self::LargeObjects => "large_objects",
            Self::Governance => "governance",
            Self::Preservation => "preservation",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed vocabulary of actions a plan can contain
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    CreateRepository,
    ConfigureRepository,
    PushContent,
    PushWiki,
    CreateLabel,
    CreateMilestone,
    CreateIssue,
    AddIssueComment,
    CreatePullRequest,
    AddPullRequestComment,
    CreateWebhook,
    CommitWorkflow,
    SetSecret,
    PushLfsObjects,
    CreateRelease,
    UploadReleaseAsset,
    AddCollaborator,
    ProtectBranch,
    UploadArchiveBundle,
    ArchiveRepository,
}

/// Static facts about an action type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDescriptor {
    pub action_type: ActionType,
    pub phase: Phase,
    /// Whether a compensating call exists
    pub reversible: bool,
    /// Parameters every action of this type must carry
    pub required_params: &'static [&'static str],
    pub summary: &'static str,
}

const fn descriptor(
    action_type: ActionType,
    phase: Phase,
    reversible: bool,
    required_params: &'static [&'static str],
    summary: &'static str,
) -> ActionDescriptor {
    ActionDescriptor {
        action_type,
        phase,
        reversible,
        required_params,
        summary,
    }
}

// Indexed by `ActionType as usize`; keep in declaration order.
static DESCRIPTORS: [ActionDescriptor; 20] = [
    descriptor(
        ActionType::CreateRepository,
        Phase::Setup,
        true,
        &["name", "visibility"],
        "Create the target repository",
    ),
    descriptor(
        ActionType::ConfigureRepository,
        Phase::Setup,
        true,
        &["name"],
        "Apply repository settings and topics",
    ),
    descriptor(
        ActionType::PushContent,
        Phase::Content,
        false,
        &["clone_url", "default_branch"],
        "Mirror-push git history, branches and tags",
    ),
    descriptor(
        ActionType::PushWiki,
        Phase::Content,
        false,
        &["clone_url"],
        "Mirror-push the wiki repository",
    ),
    descriptor(
        ActionType::CreateLabel,
        Phase::Metadata,
        true,
        &["name", "color"],
        "Create an issue label",
    ),
    descriptor(
        ActionType::CreateMilestone,
        Phase::Metadata,
        true,
        &["title"],
        "Create a milestone",
    ),
    descriptor(
        ActionType::CreateIssue,
        Phase::Entities,
        true,
        &["title"],
        "Create an issue",
    ),
    descriptor(
        ActionType::AddIssueComment,
        Phase::Entities,
        true,
        &["issue", "body"],
        "Add a comment to an issue",
    ),
    descriptor(
        ActionType::CreatePullRequest,
        Phase::Entities,
        true,
        &["title", "head", "base"],
        "Open a pull request",
    ),
    descriptor(
        ActionType::AddPullRequestComment,
        Phase::Entities,
        true,
        &["pull_request", "body"],
        "Add a comment to a pull request",
    ),
    descriptor(
        ActionType::CreateWebhook,
        Phase::Integrations,
        true,
        &["url", "events"],
        "Register a webhook",
    ),
    descriptor(
        ActionType::CommitWorkflow,
        Phase::Integrations,
        false,
        &["path", "content"],
        "Commit an automation workflow file",
    ),
    descriptor(
        ActionType::SetSecret,
        Phase::Integrations,
        true,
        &["name"],
        "Store a repository secret",
    ),
    descriptor(
        ActionType::PushLfsObjects,
        Phase::LargeObjects,
        false,
        &["objects"],
        "Upload LFS objects",
    ),
    descriptor(
        ActionType::CreateRelease,
        Phase::LargeObjects,
        true,
        &["tag"],
        "Create a release",
    ),
    descriptor(
        ActionType::UploadReleaseAsset,
        Phase::LargeObjects,
        true,
        &["release", "name", "source_url"],
        "Upload a release asset",
    ),
    descriptor(
        ActionType::AddCollaborator,
        Phase::Governance,
        true,
        &["username", "permission"],
        "Grant a collaborator access",
    ),
    descriptor(
        ActionType::ProtectBranch,
        Phase::Governance,
        true,
        &["branch"],
        "Apply branch protection rules",
    ),
    descriptor(
        ActionType::UploadArchiveBundle,
        Phase::Preservation,
        false,
        &["name", "source_url"],
        "Upload a preservation bundle",
    ),
    descriptor(
        ActionType::ArchiveRepository,
        Phase::Preservation,
        true,
        &["name"],
        "Mark the repository read-only",
    ),
];

impl ActionType {
    /// Every action type, in catalog order
    pub const ALL: [Self; 20] = [
        Self::CreateRepository,
        Self::ConfigureRepository,
        Self::PushContent,
        Self::PushWiki,
        Self::CreateLabel,
        Self::CreateMilestone,
        Self::CreateIssue,
        Self::AddIssueComment,
        Self::CreatePullRequest,
        Self::AddPullRequestComment,
        Self::CreateWebhook,
        Self::CommitWorkflow,
        Self::SetSecret,
        Self::PushLfsObjects,
        Self::CreateRelease,
        Self::UploadReleaseAsset,
        Self::AddCollaborator,
        Self::ProtectBranch,
        Self::UploadArchiveBundle,
        Self::ArchiveRepository,
    ];

    /// Descriptor for this action type
    pub fn descriptor(self) -> &'static ActionDescriptor {
        &DESCRIPTORS[self as usize]
    }

    /// Phase this action type runs in
    pub fn phase(self) -> Phase {
        self.descriptor().phase
    }

    /// Whether this action type can be compensated
    pub fn is_reversible(self) -> bool {
        self.descriptor().reversible
    }

    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateRepository => "create_repository",
            Self::ConfigureRepository => "configure_repository",
            Self::PushContent => "push_content",
            Self::PushWiki => "push_wiki",
            Self::CreateLabel => "create_label",
            Self::CreateMilestone => "create_milestone",
            Self::CreateIssue => "create_issue",
            Self::AddIssueComment => "add_issue_comment",
            Self::CreatePullRequest => "create_pull_request",
            Self::AddPullRequestComment => "add_pull_request_comment",
            Self::CreateWebhook => "create_webhook",
            Self::CommitWorkflow => "commit_workflow",
            Self::SetSecret => "set_secret",
            Self::PushLfsObjects => "push_lfs_objects",
            Self::CreateRelease => "create_release",
            Self::UploadReleaseAsset => "upload_release_asset",
            Self::AddCollaborator => "add_collaborator",
            Self::ProtectBranch => "protect_branch",
            Self::UploadArchiveBundle => "upload_archive_bundle",
            Self::ArchiveRepository => "archive_repository",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = CompilationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CompilationError::UnknownActionType {
                action_type: s.to_string(),
            })
    }
}

/// Read-only view over the compile-time action registry
pub struct Catalog;

impl Catalog {
    /// Look up the descriptor registered for an action type
    pub fn register(action_type: ActionType) -> &'static ActionDescriptor {
        action_type.descriptor()
    }

    /// All descriptors in catalog order
    pub fn descriptors() -> &'static [ActionDescriptor] {
        &DESCRIPTORS
    }

    /// Check an action against its descriptor.
    ///
    /// Parameters listed in `user_input_fields` may be present as `null`;
    /// they are filled in before dispatch.
    pub fn validate(action: &Action) -> Result<(), ValidationError> {
        let desc = Self::register(action.action_type);
        let invalid = |reason: String| ValidationError::InvalidAction {
            action_id: action.id.clone(),
            reason,
        };

        if action.phase != desc.phase {
            return Err(invalid(format!(
                "phase {} does not match catalog phase {} for {}",
                action.phase, desc.phase, action.action_type
            )));
        }

        if action.reversible != desc.reversible {
            return Err(invalid(format!(
                "reversible={} does not match catalog for {}",
                action.reversible, action.action_type
            )));
        }

        for param in desc.required_params {
            let awaiting_input = action.user_input_fields.iter().any(|f| f == param);
            match action.parameters.get(*param) {
                Some(value) if !value.is_null() || awaiting_input => {}
                _ => return Err(invalid(format!("missing required parameter `{param}`"))),
            }
        }

        if action.requires_user_input == action.user_input_fields.is_empty() {
            return Err(invalid(
                "requires_user_input must be set exactly when user_input_fields is non-empty"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn action(action_type: ActionType, params: serde_json::Value) -> Action {
        let parameters: BTreeMap<String, serde_json::Value> =
            serde_json::from_value(params).unwrap();
        Action {
            id: format!("{action_type}:x"),
            action_type,
            idempotency_key: "k".into(),
            description: String::new(),
            phase: action_type.phase(),
            dependencies: Vec::new(),
            parameters,
            requires_user_input: false,
            user_input_fields: Vec::new(),
            reversible: action_type.is_reversible(),
        }
    }

    #[test]
    fn test_descriptor_table_matches_enum_order() {
        for ty in ActionType::ALL {
            assert_eq!(ty.descriptor().action_type, ty);
        }
        assert_eq!(Catalog::descriptors().len(), ActionType::ALL.len());
    }

    #[test]
    fn test_phases_are_ordered() {
        let mut sorted = Phase::ALL;
        sorted.sort();
        assert_eq!(sorted, Phase::ALL);
        assert!(Phase::Setup < Phase::Preservation);
    }

    #[test]
    fn test_every_phase_has_an_action_type() {
        for phase in Phase::ALL {
            assert!(ActionType::ALL.iter().any(|t| t.phase() == phase));
        }
    }

    #[test]
    fn test_action_type_round_trips_through_str() {
        for ty in ActionType::ALL {
            assert_eq!(ty.as_str().parse::<ActionType>().unwrap(), ty);
            assert_eq!(
                serde_json::to_value(ty).unwrap(),
                json!(ty.as_str())
            );
        }
    }

    #[test]
    fn test_unknown_action_type() {
        let err = "delete_everything".parse::<ActionType>().unwrap_err();
        assert_eq!(
            err,
            CompilationError::UnknownActionType {
                action_type: "delete_everything".into()
            }
        );
    }

    #[test]
    fn test_push_content_is_not_reversible() {
        assert!(!Catalog::register(ActionType::PushContent).reversible);
        assert!(Catalog::register(ActionType::CreateRepository).reversible);
    }

    #[test]
    fn test_validate_accepts_complete_action() {
        let a = action(
            ActionType::CreateLabel,
            json!({"name": "bug", "color": "d73a4a"}),
        );
        assert!(Catalog::validate(&a).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_param() {
        let a = action(ActionType::CreateLabel, json!({"name": "bug"}));
        let err = Catalog::validate(&a).unwrap_err();
        assert!(err.to_string().contains("color"));
    }

    #[test]
    fn test_validate_rejects_wrong_phase() {
        let mut a = action(ActionType::CreateIssue, json!({"title": "t"}));
        a.phase = Phase::Setup;
        assert!(Catalog::validate(&a).is_err());
    }

    #[test]
    fn test_validate_allows_null_awaiting_input() {
        let mut a = action(
            ActionType::AddCollaborator,
            json!({"username": null, "permission": "push"}),
        );
        a.requires_user_input = true;
        a.user_input_fields = vec!["username".into()];
        assert!(Catalog::validate(&a).is_ok());

        a.user_input_fields.clear();
        assert!(Catalog::validate(&a).is_err());
    }
}
