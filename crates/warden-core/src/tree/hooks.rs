//! Hook traits and per-action chain tables.
//!
//! A hook is a named function over a mutable in-flight record and the
//! caller's request. A chain is an ordered list of hooks bound to a tree
//! action name. Ordering is priority ascending, stable by registration
//! order on ties.
//!
//! Chains execute sequentially on the requesting thread. A terminal
//! error before the persistence hook halts the chain and nothing is
//! persisted. Hooks ordered after the persistence hook cannot roll the
//! mutation back: their errors are logged at warn and swallowed, because
//! whatever they notify is already outside the consistency boundary.
//!
//! Hook tables are populated at startup (registration takes `&mut`) and
//! read-only afterwards, so the hot path takes no locks.

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::OpContext;
use crate::errors::{Error, Result};
use crate::proto::{Entity, Group};

/// Actions on entity key lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOp {
    List,
    Add,
    Del,
    DropAll,
}

/// A key mutation carried by an entity request.
#[derive(Debug, Clone)]
pub struct KeyAction {
    pub op: KeyOp,
    pub key_type: String,
    pub value: String,
}

/// Actions on the ordered untyped metadata list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaOp {
    Read,
    Upsert,
    ClearFuzzy,
    ClearExact,
}

/// An untyped-metadata mutation carried by an entity request.
#[derive(Debug, Clone)]
pub struct UntypedMetaAction {
    pub op: MetaOp,
    pub key: String,
    pub value: String,
}

/// Actions on group expansion rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOp {
    Include,
    Exclude,
    Drop,
}

/// A rule mutation carried by a group request.
#[derive(Debug, Clone)]
pub struct RuleAction {
    pub target: String,
    pub op: RuleOp,
}

/// The caller's payload for an entity chain.
#[derive(Debug, Clone, Default)]
pub struct EntityRequest {
    /// Request record; hooks read identifiers, secrets, and field
    /// deltas from here.
    pub data: Entity,

    /// Present for `update-entity-keys` chains.
    pub key_action: Option<KeyAction>,

    /// Present for `manage-entity-um` chains.
    pub meta_action: Option<UntypedMetaAction>,
}

/// The caller's payload for a group chain.
#[derive(Debug, Clone, Default)]
pub struct GroupRequest {
    /// Request record.
    pub data: Group,

    /// Present for `modify-group-rule` chains.
    pub rule_action: Option<RuleAction>,
}

/// A named step in an entity chain.
pub trait EntityHook: Send + Sync {
    /// Stable hook name; re-registering a name replaces the hook.
    fn name(&self) -> &str;

    /// Executes against the in-flight record.
    ///
    /// # Errors
    ///
    /// A terminal error halts the chain (pre-persistence) or is demoted
    /// to a warning (post-persistence).
    fn run(&self, ctx: &OpContext, entity: &mut Entity, request: &EntityRequest) -> Result<()>;
}

/// A named step in a group chain.
pub trait GroupHook: Send + Sync {
    /// Stable hook name; re-registering a name replaces the hook.
    fn name(&self) -> &str;

    /// Executes against the in-flight record.
    ///
    /// # Errors
    ///
    /// Same semantics as [`EntityHook::run`].
    fn run(&self, ctx: &OpContext, group: &mut Group, request: &GroupRequest) -> Result<()>;
}

/// One position in a chain.
#[derive(Debug, Clone)]
pub(crate) struct ChainLink {
    pub name: String,
    pub priority: i32,
    seq: usize,
}

/// Hook registry plus per-action chains for one record kind.
pub(crate) struct ChainSet<H: ?Sized> {
    hooks: HashMap<String, Arc<H>>,
    chains: HashMap<String, Vec<ChainLink>>,
    next_seq: usize,
}

impl<H: ?Sized> ChainSet<H> {
    /// Creates the set with an empty chain per known action.
    pub(crate) fn new(actions: &[&str]) -> Self {
        Self {
            hooks: HashMap::new(),
            chains: actions
                .iter()
                .map(|action| ((*action).to_string(), Vec::new()))
                .collect(),
            next_seq: 0,
        }
    }

    /// Registers (or replaces) a hook implementation by name.
    pub(crate) fn register(&mut self, name: &str, hook: Arc<H>) {
        if self.hooks.insert(name.to_string(), hook).is_some() {
            tracing::debug!(hook = name, "hook implementation replaced");
        }
    }

    /// Binds a registered hook into an action's chain at `priority`.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] for an unknown action or hook name; both are
    /// initialization-time mistakes.
    pub(crate) fn attach(&mut self, action: &str, hook_name: &str, priority: i32) -> Result<()> {
        if !self.hooks.contains_key(hook_name) {
            return Err(Error::internal(format!(
                "cannot attach unregistered hook {hook_name:?}"
            )));
        }
        let chain = self
            .chains
            .get_mut(action)
            .ok_or_else(|| Error::internal(format!("no chain for action {action:?}")))?;

        let seq = self.next_seq;
        self.next_seq += 1;
        let link = ChainLink {
            name: hook_name.to_string(),
            priority,
            seq,
        };
        // Priority ascending, stable on ties by registration order.
        let position = chain
            .iter()
            .position(|existing| {
                existing.priority > priority
                    || (existing.priority == priority && existing.seq > seq)
            })
            .unwrap_or(chain.len());
        chain.insert(position, link);
        Ok(())
    }

    /// The ordered chain for `action`.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] for an unknown action.
    pub(crate) fn chain(&self, action: &str) -> Result<&[ChainLink]> {
        self.chains
            .get(action)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::internal(format!("no chain for action {action:?}")))
    }

    /// The hook registered under `name`.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] when the chain references a vanished hook.
    pub(crate) fn hook(&self, name: &str) -> Result<Arc<H>> {
        self.hooks
            .get(name)
            .cloned()
            .ok_or_else(|| Error::internal(format!("hook {name:?} is not registered")))
    }
}

/// Persistence hooks: the last built-in of every mutating chain. Once
/// one of these succeeds, later errors no longer roll back.
pub(crate) fn is_persistence_hook(name: &str) -> bool {
    matches!(
        name,
        "save-entity" | "destroy-entity" | "save-group" | "destroy-group"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl EntityHook for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn run(&self, _: &OpContext, _: &mut Entity, _: &EntityRequest) -> Result<()> {
            Ok(())
        }
    }

    fn set_with(names: &[&'static str]) -> ChainSet<dyn EntityHook> {
        let mut set: ChainSet<dyn EntityHook> = ChainSet::new(&["create-entity"]);
        for name in names {
            set.register(name, Arc::new(Named(name)));
        }
        set
    }

    #[test]
    fn attach_orders_by_priority_then_registration() {
        let mut set = set_with(&["a", "b", "c", "d"]);
        set.attach("create-entity", "c", 50).unwrap();
        set.attach("create-entity", "a", 10).unwrap();
        set.attach("create-entity", "d", 50).unwrap();
        set.attach("create-entity", "b", 20).unwrap();

        let order: Vec<&str> = set
            .chain("create-entity")
            .unwrap()
            .iter()
            .map(|l| l.name.as_str())
            .collect();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn attach_to_unknown_action_is_an_error() {
        let mut set = set_with(&["a"]);
        assert!(set.attach("no-such-action", "a", 10).is_err());
    }

    #[test]
    fn attach_unregistered_hook_is_an_error() {
        let mut set = set_with(&[]);
        assert!(set.attach("create-entity", "ghost", 10).is_err());
    }

    #[test]
    fn register_replaces_by_name() {
        let mut set = set_with(&["a"]);
        set.attach("create-entity", "a", 10).unwrap();
        set.register("a", Arc::new(Named("a")));
        // Chain still references one link; the implementation swapped.
        assert_eq!(set.chain("create-entity").unwrap().len(), 1);
    }

    #[test]
    fn persistence_hook_names() {
        assert!(is_persistence_hook("save-entity"));
        assert!(is_persistence_hook("destroy-group"));
        assert!(!is_persistence_hook("secure-secret"));
    }
}
