//! Chore assignment.
//!
//! The backend stores `assigned_to` as either a single user id or an array of
//! ids, with an `is_multiple` flag describing which. That pair is resolved
//! into [`Assignment`] once, when the row is decoded, so call sites never
//! inspect the wire shape.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AssignmentWire", into = "AssignmentWire")]
pub enum Assignment {
    Single(UserId),
    Multiple(Vec<UserId>),
}

impl Assignment {
    pub fn assignees(&self) -> &[UserId] {
        match self {
            Assignment::Single(user) => std::slice::from_ref(user),
            Assignment::Multiple(users) => users,
        }
    }

    pub fn includes(&self, user: &UserId) -> bool {
        self.assignees().contains(user)
    }

    pub fn is_multiple(&self) -> bool {
        matches!(self, Assignment::Multiple(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum AssignedTo {
    One(UserId),
    Many(Vec<UserId>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AssignmentWire {
    assigned_to: AssignedTo,
    #[serde(default)]
    is_multiple: bool,
}

impl TryFrom<AssignmentWire> for Assignment {
    type Error = DomainError;

    fn try_from(wire: AssignmentWire) -> Result<Self, Self::Error> {
        match (wire.assigned_to, wire.is_multiple) {
            (AssignedTo::One(user), false) => Ok(Assignment::Single(user)),
            (AssignedTo::One(user), true) => Ok(Assignment::Multiple(vec![user])),
            (AssignedTo::Many(users), _) if users.is_empty() => Err(DomainError::EmptyAssignment),
            (AssignedTo::Many(users), true) => Ok(Assignment::Multiple(users)),
            (AssignedTo::Many(mut users), false) => {
                if users.len() == 1 {
                    Ok(Assignment::Single(users.remove(0)))
                } else {
                    Err(DomainError::AssignmentShapeMismatch { count: users.len() })
                }
            }
        }
    }
}

impl From<Assignment> for AssignmentWire {
    fn from(assignment: Assignment) -> Self {
        match assignment {
            Assignment::Single(user) => AssignmentWire {
                assigned_to: AssignedTo::One(user),
                is_multiple: false,
            },
            Assignment::Multiple(users) => AssignmentWire {
                assigned_to: AssignedTo::Many(users),
                is_multiple: true,
            },
        }
    }
}
