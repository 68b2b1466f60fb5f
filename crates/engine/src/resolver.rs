//! Approver resolution: maps a step's assignment rule to the concrete
//! set of users allowed to act on it.
//!
//! Resolution is synchronous and side-effect-free; it is the single seam
//! where richer rule kinds (roles, dynamic queries) would be added.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::models::{UserId, WorkflowInstance};

// ---------------------------------------------------------------------------
// AssignmentRule
// ---------------------------------------------------------------------------

/// Who is responsible for a step.
///
/// Persisted as a plain string (`"SUBMITTER"` or a literal user id);
/// parsed into a closed variant so an unhandled rule kind is a compile
/// error rather than a silent no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum AssignmentRule {
    /// The user who created the instance.
    Submitter,
    /// A fixed user id.
    User(UserId),
}

/// Stored spelling of the submitter sentinel.
const SUBMITTER_RULE: &str = "SUBMITTER";

impl AssignmentRule {
    /// Parse the persisted string form.
    ///
    /// # Errors
    /// [`EngineError::UnresolvableAssignment`] if the rule is blank.
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EngineError::UnresolvableAssignment { rule: raw.to_owned() });
        }
        if trimmed == SUBMITTER_RULE {
            return Ok(Self::Submitter);
        }
        Ok(Self::User(trimmed.to_owned()))
    }

    /// The persisted string form.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Submitter => SUBMITTER_RULE,
            Self::User(id) => id,
        }
    }
}

impl From<AssignmentRule> for String {
    fn from(rule: AssignmentRule) -> Self {
        rule.as_str().to_owned()
    }
}

impl TryFrom<String> for AssignmentRule {
    type Error = String;
    fn try_from(raw: String) -> Result<Self, Self::Error> {
        AssignmentRule::parse(&raw).map_err(|e| e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Run-time context a rule is evaluated against.
pub struct ResolveContext<'a> {
    /// The instance the step belongs to (reference, version, creator).
    pub instance: &'a WorkflowInstance,
    /// The user who created the instance.
    pub submitter_id: &'a str,
}

/// Resolve a rule to the set of users allowed to act.
///
/// Guaranteed to return a non-empty set; a rule that resolves to nobody
/// fails with [`EngineError::UnresolvableAssignment`] so a pending step
/// nobody can act on is never created.
pub fn resolve_assignees(
    rule: &AssignmentRule,
    ctx: &ResolveContext<'_>,
) -> Result<BTreeSet<UserId>, EngineError> {
    let assignees: BTreeSet<UserId> = match rule {
        AssignmentRule::Submitter => {
            if ctx.submitter_id.trim().is_empty() {
                return Err(EngineError::UnresolvableAssignment {
                    rule: SUBMITTER_RULE.to_owned(),
                });
            }
            std::iter::once(ctx.submitter_id.to_owned()).collect()
        }
        AssignmentRule::User(id) => {
            if id.trim().is_empty() {
                return Err(EngineError::UnresolvableAssignment { rule: id.clone() });
            }
            std::iter::once(id.clone()).collect()
        }
    };

    Ok(assignees)
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InstanceStatus, Ref};
    use chrono::Utc;
    use uuid::Uuid;

    fn instance(created_by: &str) -> WorkflowInstance {
        WorkflowInstance {
            id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            workflow_version: 1,
            reference: Ref::new("doc", "42"),
            status: InstanceStatus::InProgress,
            current_step_id: None,
            created_by: created_by.into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn submitter_rule_resolves_to_the_submitter() {
        let inst = instance("user-a");
        let ctx = ResolveContext { instance: &inst, submitter_id: "user-a" };
        let set = resolve_assignees(&AssignmentRule::Submitter, &ctx).unwrap();
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec!["user-a"]);
    }

    #[test]
    fn literal_rule_resolves_to_the_named_user() {
        let inst = instance("user-a");
        let ctx = ResolveContext { instance: &inst, submitter_id: "user-a" };
        let set = resolve_assignees(&AssignmentRule::User("manager-1".into()), &ctx).unwrap();
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec!["manager-1"]);
    }

    #[test]
    fn blank_submitter_is_unresolvable() {
        let inst = instance("");
        let ctx = ResolveContext { instance: &inst, submitter_id: "" };
        assert!(matches!(
            resolve_assignees(&AssignmentRule::Submitter, &ctx),
            Err(EngineError::UnresolvableAssignment { .. })
        ));
    }

    #[test]
    fn blank_literal_is_unresolvable() {
        let inst = instance("user-a");
        let ctx = ResolveContext { instance: &inst, submitter_id: "user-a" };
        assert!(matches!(
            resolve_assignees(&AssignmentRule::User("  ".into()), &ctx),
            Err(EngineError::UnresolvableAssignment { .. })
        ));
    }

    #[test]
    fn parse_accepts_sentinel_and_literals() {
        assert_eq!(AssignmentRule::parse("SUBMITTER").unwrap(), AssignmentRule::Submitter);
        assert_eq!(
            AssignmentRule::parse("user-7").unwrap(),
            AssignmentRule::User("user-7".into())
        );
    }

    #[test]
    fn parse_rejects_blank_rules() {
        assert!(AssignmentRule::parse("").is_err());
        assert!(AssignmentRule::parse("   ").is_err());
    }

    #[test]
    fn string_round_trip() {
        for raw in ["SUBMITTER", "user-7"] {
            assert_eq!(AssignmentRule::parse(raw).unwrap().as_str(), raw);
        }
    }
}
