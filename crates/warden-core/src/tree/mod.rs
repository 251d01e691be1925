//! The transactional entity/group manager.
//!
//! Every externally visible operation is either a pure read (no chain,
//! no write, no event) or a mutation: an ordered hook chain runs the
//! preconditions, the primitive, persistence, and post-persistence
//! synchronization. The tree owns the only encode/decode path for
//! stored records, feeds the membership resolver through explicit sync
//! hooks, and keeps the search index fresh through the KV event stream.
//!
//! Redaction happens here, not at the protocol layer: every record copy
//! produced for a caller routes through [`Entity::redacted`].

mod builtin;
mod entity;
mod group;
mod hooks;

use std::sync::{Arc, Mutex, Weak};

pub use hooks::{
    EntityHook, EntityRequest, GroupHook, GroupRequest, KeyAction, KeyOp, MetaOp, RuleAction,
    RuleOp, UntypedMetaAction,
};

use crate::context::OpContext;
use crate::crypto::Crypto;
use crate::errors::{Error, Result};
use crate::kv::{ENTITY_PREFIX, EventKind, GROUP_PREFIX, KvStore, entity_key, group_key};
use crate::proto::{Capability, Entity, Group};
use crate::resolver::{GroupRule, MembershipResolver};
use crate::search::SearchIndex;
use hooks::{ChainSet, is_persistence_hook};

/// Entity chain action names.
pub const ENTITY_ACTIONS: &[&str] = &[
    "create-entity",
    "destroy-entity",
    "set-entity-secret",
    "lock-entity",
    "unlock-entity",
    "update-entity-meta",
    "update-entity-keys",
    "manage-entity-um",
    "add-entity-to-group",
    "remove-entity-from-group",
    "set-entity-capability",
    "drop-entity-capability",
];

/// Group chain action names.
pub const GROUP_ACTIONS: &[&str] = &[
    "create-group",
    "destroy-group",
    "update-group-meta",
    "modify-group-rule",
    "set-group-capability",
    "drop-group-capability",
];

/// Default entity chains: (action, [(hook, priority)]).
const ENTITY_DEFAULT_CHAINS: &[(&str, &[(&str, i32)])] = &[
    (
        "create-entity",
        &[
            ("initialize-entity", 5),
            ("fail-on-existing-entity", 10),
            ("next-entity-number", 20),
            ("secure-secret", 30),
            ("save-entity", 50),
            ("sync-entity-resolver", 60),
        ],
    ),
    (
        "destroy-entity",
        &[
            ("load-entity", 10),
            ("destroy-entity", 50),
            ("purge-entity-resolver", 60),
        ],
    ),
    (
        "set-entity-secret",
        &[
            ("load-entity", 10),
            ("secure-secret", 30),
            ("save-entity", 50),
        ],
    ),
    (
        "lock-entity",
        &[
            ("load-entity", 10),
            ("lock-entity-flag", 20),
            ("save-entity", 50),
        ],
    ),
    (
        "unlock-entity",
        &[
            ("load-entity", 10),
            ("unlock-entity-flag", 20),
            ("save-entity", 50),
        ],
    ),
    (
        "update-entity-meta",
        &[
            ("load-entity", 10),
            ("merge-entity-meta", 20),
            ("save-entity", 50),
        ],
    ),
    (
        "update-entity-keys",
        &[
            ("load-entity", 10),
            ("apply-key-change", 20),
            ("save-entity", 50),
        ],
    ),
    (
        "manage-entity-um",
        &[
            ("load-entity", 10),
            ("apply-untyped-meta", 20),
            ("save-entity", 50),
        ],
    ),
    (
        "add-entity-to-group",
        &[
            ("load-entity", 10),
            ("must-know-group", 15),
            ("add-direct-membership", 20),
            ("save-entity", 50),
            ("sync-entity-resolver", 60),
        ],
    ),
    (
        "remove-entity-from-group",
        &[
            ("load-entity", 10),
            ("del-direct-membership", 20),
            ("save-entity", 50),
            ("sync-entity-resolver", 60),
        ],
    ),
    (
        "set-entity-capability",
        &[
            ("load-entity", 10),
            ("grant-entity-capability", 20),
            ("save-entity", 50),
        ],
    ),
    (
        "drop-entity-capability",
        &[
            ("load-entity", 10),
            ("strip-entity-capability", 20),
            ("save-entity", 50),
        ],
    ),
];

/// Default group chains.
const GROUP_DEFAULT_CHAINS: &[(&str, &[(&str, i32)])] = &[
    (
        "create-group",
        &[
            ("initialize-group", 5),
            ("fail-on-existing-group", 10),
            ("next-group-number", 20),
            ("save-group", 50),
            ("sync-group-resolver", 60),
        ],
    ),
    (
        "destroy-group",
        &[
            ("load-group", 10),
            ("destroy-group", 50),
            ("purge-group-resolver", 60),
            ("scrub-group-members", 70),
        ],
    ),
    (
        "update-group-meta",
        &[
            ("load-group", 10),
            ("merge-group-meta", 20),
            ("save-group", 50),
        ],
    ),
    (
        "modify-group-rule",
        &[
            ("load-group", 10),
            ("apply-group-rule", 20),
            ("save-group", 50),
            ("sync-group-resolver", 60),
        ],
    ),
    (
        "set-group-capability",
        &[
            ("load-group", 10),
            ("grant-group-capability", 20),
            ("save-group", 50),
        ],
    ),
    (
        "drop-group-capability",
        &[
            ("load-group", 10),
            ("strip-group-capability", 20),
            ("save-group", 50),
        ],
    ),
];

/// The directory tree.
pub struct Tree {
    kv: Arc<dyn KvStore>,
    crypto: Arc<dyn Crypto>,
    resolver: Arc<MembershipResolver>,
    index: Arc<SearchIndex>,
    entity_set: ChainSet<dyn EntityHook>,
    group_set: ChainSet<dyn GroupHook>,
    /// Serializes create chains so max-plus-one number scans never race.
    alloc_lock: Mutex<()>,
}

impl Tree {
    /// Builds a tree over the given backends: installs the built-in
    /// hooks and default chains, wires the KV event stream into the
    /// search index, and warms the resolver and index from storage.
    ///
    /// External hooks register afterwards, before the tree is shared;
    /// registration takes `&mut self`, so the tables freeze once the
    /// tree goes behind an `Arc`.
    ///
    /// # Errors
    ///
    /// Fails when storage cannot be scanned or holds corrupt records.
    pub fn new(kv: Arc<dyn KvStore>, crypto: Arc<dyn Crypto>) -> Result<Self> {
        let mut tree = Self {
            kv,
            crypto,
            resolver: Arc::new(MembershipResolver::new()),
            index: Arc::new(SearchIndex::new()),
            entity_set: ChainSet::new(ENTITY_ACTIONS),
            group_set: ChainSet::new(GROUP_ACTIONS),
            alloc_lock: Mutex::new(()),
        };
        tree.install_builtin_hooks()?;
        tree.wire_search_events();
        tree.warm_caches()?;
        Ok(tree)
    }

    /// Registers (or replaces) an entity hook implementation.
    pub fn register_entity_hook(&mut self, hook: Arc<dyn EntityHook>) {
        let name = hook.name().to_string();
        self.entity_set.register(&name, hook);
    }

    /// Binds a registered entity hook into `action` at `priority`.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] for an unknown action or hook name.
    pub fn attach_entity_hook(&mut self, action: &str, hook: &str, priority: i32) -> Result<()> {
        self.entity_set.attach(action, hook, priority)
    }

    /// Registers (or replaces) a group hook implementation.
    pub fn register_group_hook(&mut self, hook: Arc<dyn GroupHook>) {
        let name = hook.name().to_string();
        self.group_set.register(&name, hook);
    }

    /// Binds a registered group hook into `action` at `priority`.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] for an unknown action or hook name.
    pub fn attach_group_hook(&mut self, action: &str, hook: &str, priority: i32) -> Result<()> {
        self.group_set.attach(action, hook, priority)
    }

    /// The store's advertised capabilities.
    #[must_use]
    pub fn store_capabilities(&self) -> Vec<crate::kv::StoreCapability> {
        self.kv.capabilities()
    }

    /// Entities matching a search expression, redacted.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::search::SearchIndex::search_entities`].
    pub fn search_entities(&self, expression: &str) -> Result<Vec<Entity>> {
        self.index.search_entities(expression)
    }

    /// Groups matching a search expression.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::search::SearchIndex::search_groups`].
    pub fn search_groups(&self, expression: &str) -> Result<Vec<Group>> {
        self.index.search_groups(expression)
    }

    /// Entity IDs the resolver places in `group`.
    #[must_use]
    pub fn group_member_ids(&self, group: &str) -> Vec<String> {
        self.resolver.members_of_group(group)
    }

    /// Group names the resolver derives for `entity`.
    #[must_use]
    pub fn entity_group_names(&self, entity: &str) -> Vec<String> {
        self.resolver.groups_for_entity(entity)
    }

    fn install_builtin_hooks(&mut self) -> Result<()> {
        let kv = &self.kv;
        let resolver = &self.resolver;

        self.entity_set
            .register("initialize-entity", Arc::new(builtin::InitializeEntity));
        self.entity_set.register(
            "fail-on-existing-entity",
            Arc::new(builtin::FailOnExistingEntity { kv: kv.clone() }),
        );
        self.entity_set
            .register("load-entity", Arc::new(builtin::LoadEntity { kv: kv.clone() }));
        self.entity_set.register(
            "next-entity-number",
            Arc::new(builtin::NextEntityNumber { kv: kv.clone() }),
        );
        self.entity_set.register(
            "secure-secret",
            Arc::new(builtin::SecureSecret {
                crypto: self.crypto.clone(),
            }),
        );
        self.entity_set
            .register("merge-entity-meta", Arc::new(builtin::MergeEntityMeta));
        self.entity_set
            .register("lock-entity-flag", Arc::new(builtin::SetLockFlag));
        self.entity_set
            .register("unlock-entity-flag", Arc::new(builtin::ClearLockFlag));
        self.entity_set
            .register("apply-key-change", Arc::new(builtin::ApplyKeyChange));
        self.entity_set
            .register("apply-untyped-meta", Arc::new(builtin::ApplyUntypedMeta));
        self.entity_set.register(
            "must-know-group",
            Arc::new(builtin::EnsureGroupsExist { kv: kv.clone() }),
        );
        self.entity_set
            .register("add-direct-membership", Arc::new(builtin::AddDirectMembership));
        self.entity_set
            .register("del-direct-membership", Arc::new(builtin::DelDirectMembership));
        self.entity_set.register(
            "grant-entity-capability",
            Arc::new(builtin::GrantEntityCapability),
        );
        self.entity_set.register(
            "strip-entity-capability",
            Arc::new(builtin::StripEntityCapability),
        );
        self.entity_set
            .register("save-entity", Arc::new(builtin::SaveEntity { kv: kv.clone() }));
        self.entity_set.register(
            "destroy-entity",
            Arc::new(builtin::DestroyEntity { kv: kv.clone() }),
        );
        self.entity_set.register(
            "sync-entity-resolver",
            Arc::new(builtin::SyncEntityResolver {
                resolver: resolver.clone(),
            }),
        );
        self.entity_set.register(
            "purge-entity-resolver",
            Arc::new(builtin::PurgeEntityResolver {
                resolver: resolver.clone(),
            }),
        );

        self.group_set
            .register("initialize-group", Arc::new(builtin::InitializeGroup));
        self.group_set.register(
            "fail-on-existing-group",
            Arc::new(builtin::FailOnExistingGroup { kv: kv.clone() }),
        );
        self.group_set
            .register("load-group", Arc::new(builtin::LoadGroup { kv: kv.clone() }));
        self.group_set.register(
            "next-group-number",
            Arc::new(builtin::NextGroupNumber { kv: kv.clone() }),
        );
        self.group_set
            .register("merge-group-meta", Arc::new(builtin::MergeGroupMeta));
        self.group_set.register(
            "apply-group-rule",
            Arc::new(builtin::ApplyGroupRule { kv: kv.clone() }),
        );
        self.group_set.register(
            "grant-group-capability",
            Arc::new(builtin::GrantGroupCapability),
        );
        self.group_set.register(
            "strip-group-capability",
            Arc::new(builtin::StripGroupCapability),
        );
        self.group_set
            .register("save-group", Arc::new(builtin::SaveGroup { kv: kv.clone() }));
        self.group_set.register(
            "destroy-group",
            Arc::new(builtin::DestroyGroup { kv: kv.clone() }),
        );
        self.group_set.register(
            "sync-group-resolver",
            Arc::new(builtin::SyncGroupResolver {
                resolver: resolver.clone(),
            }),
        );
        self.group_set.register(
            "purge-group-resolver",
            Arc::new(builtin::PurgeGroupResolver {
                resolver: resolver.clone(),
            }),
        );
        self.group_set.register(
            "scrub-group-members",
            Arc::new(builtin::ScrubGroupMembers {
                kv: kv.clone(),
                resolver: resolver.clone(),
            }),
        );

        for (action, links) in ENTITY_DEFAULT_CHAINS {
            for (hook, priority) in *links {
                self.entity_set.attach(action, hook, *priority)?;
            }
        }
        for (action, links) in GROUP_DEFAULT_CHAINS {
            for (hook, priority) in *links {
                self.group_set.attach(action, hook, *priority)?;
            }
        }
        Ok(())
    }

    /// Routes KV mutation events into the search index. The sink holds
    /// a weak store handle: it reads the fresh record back through the
    /// same store, and the store must not own itself.
    fn wire_search_events(&self) {
        let index = Arc::clone(&self.index);
        let weak_kv: Weak<dyn KvStore> = Arc::downgrade(&self.kv);
        self.kv.set_event_sink(Box::new(move |event| {
            let ctx = OpContext::background();
            match event.kind {
                EventKind::EntityUpdate => {
                    let Some(kv) = weak_kv.upgrade() else { return };
                    match kv
                        .get(&ctx, &entity_key(&event.primary_key))
                        .and_then(|bytes| Entity::from_bytes(&bytes))
                    {
                        Ok(entity) => index.index_entity(&entity),
                        Err(e) => {
                            tracing::warn!(id = %event.primary_key, error = %e, "search index skipped entity update");
                        }
                    }
                }
                EventKind::EntityDestroy => index.remove_entity(&event.primary_key),
                EventKind::GroupUpdate => {
                    let Some(kv) = weak_kv.upgrade() else { return };
                    match kv
                        .get(&ctx, &group_key(&event.primary_key))
                        .and_then(|bytes| Group::from_bytes(&bytes))
                    {
                        Ok(group) => index.index_group(&group),
                        Err(e) => {
                            tracing::warn!(name = %event.primary_key, error = %e, "search index skipped group update");
                        }
                    }
                }
                EventKind::GroupDestroy => index.remove_group(&event.primary_key),
            }
        }));
    }

    /// Loads every stored record into the resolver and search index.
    fn warm_caches(&self) -> Result<()> {
        let ctx = OpContext::background();

        let mut rules = Vec::new();
        for key in self.kv.keys(&ctx, &format!("{GROUP_PREFIX}*"))? {
            let bytes = match self.kv.get(&ctx, &key) {
                Ok(bytes) => bytes,
                Err(Error::NoValue) => continue,
                Err(e) => return Err(e),
            };
            let group = Group::from_bytes(&bytes)?;
            self.index.index_group(&group);
            rules.push((
                group.name.clone(),
                GroupRule {
                    include: group.rule_include.clone(),
                    exclude: group.rule_exclude.clone(),
                },
            ));
        }
        self.resolver.seed(rules);

        for key in self.kv.keys(&ctx, &format!("{ENTITY_PREFIX}*"))? {
            let bytes = match self.kv.get(&ctx, &key) {
                Ok(bytes) => bytes,
                Err(Error::NoValue) => continue,
                Err(e) => return Err(e),
            };
            let entity = Entity::from_bytes(&bytes)?;
            self.index.index_entity(&entity);
            self.resolver
                .sync_direct_groups(&entity.id, entity.direct_groups().to_vec());
        }
        Ok(())
    }

    /// Runs an entity chain to completion.
    ///
    /// Cancellation is checked before every pre-persistence hook; once
    /// the persistence hook has run, the persisted state is
    /// authoritative and later hook failures (or cancellation) are
    /// demoted to warnings.
    pub(crate) fn run_entity_chain(
        &self,
        ctx: &OpContext,
        action: &str,
        request: &EntityRequest,
    ) -> Result<Entity> {
        let links: Vec<_> = self.entity_set.chain(action)?.to_vec();
        let mut entity = Entity::default();
        let mut persisted = false;
        for link in links {
            if !persisted {
                ctx.check()?;
            }
            let hook = self.entity_set.hook(&link.name)?;
            match hook.run(ctx, &mut entity, request) {
                Ok(()) => {
                    if is_persistence_hook(&link.name) {
                        persisted = true;
                    }
                }
                Err(e) if persisted => {
                    tracing::warn!(action, hook = %link.name, error = %e, "post-persistence hook failure swallowed");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(entity)
    }

    /// Runs a group chain to completion; semantics as
    /// [`Self::run_entity_chain`].
    pub(crate) fn run_group_chain(
        &self,
        ctx: &OpContext,
        action: &str,
        request: &GroupRequest,
    ) -> Result<Group> {
        let links: Vec<_> = self.group_set.chain(action)?.to_vec();
        let mut group = Group::default();
        let mut persisted = false;
        for link in links {
            if !persisted {
                ctx.check()?;
            }
            let hook = self.group_set.hook(&link.name)?;
            match hook.run(ctx, &mut group, request) {
                Ok(()) => {
                    if is_persistence_hook(&link.name) {
                        persisted = true;
                    }
                }
                Err(e) if persisted => {
                    tracing::warn!(action, hook = %link.name, error = %e, "post-persistence hook failure swallowed");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(group)
    }

    /// Direct plus transitive capability tags for an entity: its own
    /// tags united with the tags of every group the resolver places it
    /// in.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownEntity`] when the entity does not exist.
    pub fn entity_capabilities(&self, ctx: &OpContext, id: &str) -> Result<Vec<Capability>> {
        let entity = self.load_entity_raw(ctx, id)?;
        let mut tags: Vec<Capability> = Vec::new();
        let mut push = |raw: i32| {
            if let Ok(cap) = Capability::try_from(raw) {
                if !tags.contains(&cap) {
                    tags.push(cap);
                }
            }
        };
        if let Some(meta) = &entity.meta {
            for raw in &meta.capabilities {
                push(*raw);
            }
        }
        for name in self.resolver.groups_for_entity(id) {
            match self.kv.get(ctx, &group_key(&name)) {
                Ok(bytes) => {
                    for raw in Group::from_bytes(&bytes)?.capabilities {
                        push(raw);
                    }
                }
                Err(Error::NoValue) => continue,
                Err(e) => return Err(e),
            }
        }
        tags.sort();
        Ok(tags)
    }

    /// Whether an entity holds `capability` directly or transitively.
    /// `GLOBAL_ROOT` implies every other tag.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownEntity`] when the entity does not exist.
    pub fn entity_has_capability(
        &self,
        ctx: &OpContext,
        id: &str,
        capability: Capability,
    ) -> Result<bool> {
        let held = self.entity_capabilities(ctx, id)?;
        Ok(held.contains(&Capability::GlobalRoot) || held.contains(&capability))
    }

    pub(crate) fn load_entity_raw(&self, ctx: &OpContext, id: &str) -> Result<Entity> {
        match self.kv.get(ctx, &entity_key(id)) {
            Ok(bytes) => Entity::from_bytes(&bytes),
            Err(Error::NoValue) => Err(Error::UnknownEntity),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn load_group_raw(&self, ctx: &OpContext, name: &str) -> Result<Group> {
        match self.kv.get(ctx, &group_key(name)) {
            Ok(bytes) => Group::from_bytes(&bytes),
            Err(Error::NoValue) => Err(Error::UnknownGroup),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn crypto(&self) -> &Arc<dyn Crypto> {
        &self.crypto
    }

    pub(crate) fn alloc_guard(&self) -> std::sync::MutexGuard<'_, ()> {
        match self.alloc_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::crypto::BcryptEngine;
    use crate::kv::MemoryStore;

    /// A tree over a fresh in-memory store and a fast bcrypt engine.
    pub(crate) fn memory_tree() -> Tree {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let crypto: Arc<dyn Crypto> = Arc::new(BcryptEngine::new(4));
        Tree::new(kv, crypto).expect("fresh tree")
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::memory_tree;
    use super::*;

    struct TrapHook;

    impl EntityHook for TrapHook {
        fn name(&self) -> &str {
            "trap"
        }

        fn run(&self, _: &OpContext, _: &mut Entity, request: &EntityRequest) -> Result<()> {
            if request.data.id == "trap" {
                return Err(Error::internal("trapped"));
            }
            Ok(())
        }
    }

    #[test]
    fn pre_hook_failure_halts_persistence() {
        let mut tree = memory_tree();
        tree.register_entity_hook(Arc::new(TrapHook));
        tree.attach_entity_hook("create-entity", "trap", 15).unwrap();
        let ctx = OpContext::background();

        assert!(matches!(
            tree.create_entity(&ctx, "trap", -1, "secret"),
            Err(Error::Internal(_))
        ));
        assert_eq!(tree.fetch_entity(&ctx, "trap"), Err(Error::UnknownEntity));

        // Entities that miss the trap still persist.
        tree.create_entity(&ctx, "fine", -1, "secret").unwrap();
        assert!(tree.fetch_entity(&ctx, "fine").is_ok());
    }

    struct FlakyPostHook;

    impl EntityHook for FlakyPostHook {
        fn name(&self) -> &str {
            "flaky-notifier"
        }

        fn run(&self, _: &OpContext, _: &mut Entity, _: &EntityRequest) -> Result<()> {
            Err(Error::internal("notify failed"))
        }
    }

    #[test]
    fn post_persistence_failure_is_swallowed() {
        let mut tree = memory_tree();
        tree.register_entity_hook(Arc::new(FlakyPostHook));
        tree.attach_entity_hook("create-entity", "flaky-notifier", 90)
            .unwrap();
        let ctx = OpContext::background();

        tree.create_entity(&ctx, "alice", -1, "secret").unwrap();
        assert!(tree.fetch_entity(&ctx, "alice").is_ok());
    }

    #[test]
    fn attach_to_unknown_action_fails_at_init() {
        let mut tree = memory_tree();
        tree.register_entity_hook(Arc::new(TrapHook));
        assert!(tree.attach_entity_hook("frobnicate-entity", "trap", 10).is_err());
    }

    #[test]
    fn warm_caches_restore_resolver_and_index() {
        let kv: Arc<dyn KvStore> = Arc::new(crate::kv::MemoryStore::new());
        let crypto: Arc<dyn Crypto> = Arc::new(crate::crypto::BcryptEngine::new(4));
        {
            let tree = Tree::new(kv.clone(), crypto.clone()).unwrap();
            let ctx = OpContext::background();
            tree.create_group(&ctx, "ops", "", "", -1).unwrap();
            tree.create_entity(&ctx, "alice", -1, "secret").unwrap();
            tree.add_entity_to_group(&ctx, "alice", "ops").unwrap();
        }

        // A second tree over the same store rebuilds its caches.
        let tree = Tree::new(kv, crypto).unwrap();
        assert_eq!(tree.group_member_ids("ops"), vec!["alice".to_string()]);
        assert_eq!(tree.search_entities("alice").unwrap().len(), 1);
    }

    #[test]
    fn capability_evaluation_is_direct_plus_transitive() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_group(&ctx, "admins", "", "", -1).unwrap();
        tree.create_entity(&ctx, "alice", -1, "secret").unwrap();
        tree.set_group_capability(&ctx, "admins", "CREATE_ENTITY").unwrap();
        tree.set_entity_capability(&ctx, "alice", "LOCK_ENTITY").unwrap();
        tree.add_entity_to_group(&ctx, "alice", "admins").unwrap();

        let caps = tree.entity_capabilities(&ctx, "alice").unwrap();
        assert!(caps.contains(&Capability::CreateEntity));
        assert!(caps.contains(&Capability::LockEntity));
        assert!(tree
            .entity_has_capability(&ctx, "alice", Capability::CreateEntity)
            .unwrap());
        assert!(!tree
            .entity_has_capability(&ctx, "alice", Capability::DestroyGroup)
            .unwrap());
    }

    #[test]
    fn global_root_implies_everything() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_entity(&ctx, "root", -1, "secret").unwrap();
        tree.set_entity_capability(&ctx, "root", "GLOBAL_ROOT").unwrap();

        for cap in Capability::ALL {
            assert!(tree.entity_has_capability(&ctx, "root", cap).unwrap());
        }
    }
}
