//! Query scoping policies.

use crate::auth::Caller;
use stash_core::config::Visibility;
use stash_core::{Node, NodeScope};
use std::sync::Arc;

/// Decides which nodes a caller may see in queries, listings and reads.
pub trait VisibilityPolicy: Send + Sync {
    fn scope(&self, caller: &Caller) -> NodeScope;
}

/// Everyone sees every node.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenVisibility;

impl VisibilityPolicy for OpenVisibility {
    fn scope(&self, _caller: &Caller) -> NodeScope {
        NodeScope::All
    }
}

/// Token callers see their own nodes plus unowned ones, admins see everything
/// and anonymous callers see unowned nodes only.
#[derive(Debug, Default, Clone, Copy)]
pub struct OwnerVisibility;

impl VisibilityPolicy for OwnerVisibility {
    fn scope(&self, caller: &Caller) -> NodeScope {
        if caller.is_admin() {
            NodeScope::All
        } else {
            NodeScope::VisibleTo(caller.identity())
        }
    }
}

/// Build the policy selected by configuration.
pub fn policy_for(visibility: Visibility) -> Arc<dyn VisibilityPolicy> {
    match visibility {
        Visibility::Open => Arc::new(OpenVisibility),
        Visibility::Owner => Arc::new(OwnerVisibility),
    }
}

/// Whether `node` falls inside `scope`.
pub fn in_scope(scope: &NodeScope, node: &Node) -> bool {
    match scope {
        NodeScope::All => true,
        NodeScope::VisibleTo(identity) => match &node.owner {
            None => true,
            Some(owner) => identity.as_deref() == Some(owner.as_str()),
        },
    }
}
