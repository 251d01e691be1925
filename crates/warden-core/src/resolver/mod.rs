//! Membership resolver.
//!
//! Flattens recursive group include/exclude rules into boolean
//! expressions and answers bidirectional membership queries under
//! ongoing mutation. The resolver is a pure in-memory module: it never
//! reads storage, and the tree feeds it through explicit `sync_*` calls.
//!
//! # Locking
//!
//! Two reader/writer locks partition the state so entity churn and group
//! churn do not contend:
//!
//! - user index: `direct[entity] -> {group}`
//! - group index: rule cache, resolved expressions, reverse dependency
//!   edges (`affectors`)
//!
//! Resolution recurses depth-first through rule references. The group
//! lock is RELEASED before each recursive fetch and reacquired after;
//! holding it across recursion would deadlock a concurrent sync. The
//! consequence is that a query issued during a sync observes either the
//! pre- or post-state of each group, atomically per group.
//!
//! Cycles are not detected here. The tree refuses rule edits that would
//! introduce one, which also bounds the cascade in [`sync_group`]: the
//! dependency graph is acyclic, so visiting each dependent once
//! terminates.
//!
//! [`sync_group`]: MembershipResolver::sync_group

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;

/// Resolver-level failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolverError {
    /// A referenced group has no rule cached yet.
    #[error("no rule cached for group {0}")]
    InsufficientKnowledge(String),
}

/// Boolean expression over group identifiers.
///
/// `resolve(G) = (G ∨ resolve(i₁) ∨ …) ∧ ¬resolve(e₁) ∧ … ∧ ¬resolve(eₘ)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// Direct membership in the named group.
    Group(String),
    /// Logical OR.
    Any(Vec<Expr>),
    /// Logical AND.
    All(Vec<Expr>),
    /// Logical NOT.
    Not(Box<Expr>),
}

impl Expr {
    /// Evaluates the expression against an entity's direct-membership
    /// set.
    #[must_use]
    pub fn eval(&self, direct: &HashSet<String>) -> bool {
        match self {
            Self::Group(name) => direct.contains(name),
            Self::Any(terms) => terms.iter().any(|t| t.eval(direct)),
            Self::All(terms) => terms.iter().all(|t| t.eval(direct)),
            Self::Not(term) => !term.eval(direct),
        }
    }

    /// Collects every group identifier the expression mentions.
    pub fn mentions(&self, out: &mut HashSet<String>) {
        match self {
            Self::Group(name) => {
                out.insert(name.clone());
            }
            Self::Any(terms) | Self::All(terms) => {
                for term in terms {
                    term.mentions(out);
                }
            }
            Self::Not(term) => term.mentions(out),
        }
    }
}

/// A group's expansion rule as fed by the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupRule {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Default)]
struct GroupIndex {
    /// `ruleCache[group]`.
    rules: HashMap<String, GroupRule>,
    /// `resolvedExpression[group]`.
    expressions: HashMap<String, Expr>,
    /// `groupAffectors[group]`: groups whose resolution depends on it.
    affectors: HashMap<String, HashSet<String>>,
}

/// Concurrent bidirectional membership index.
#[derive(Default)]
pub struct MembershipResolver {
    users: RwLock<HashMap<String, HashSet<String>>>,
    groups: RwLock<GroupIndex>,
}

impl MembershipResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read_users(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, HashSet<String>>> {
        match self.users.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_users(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, HashSet<String>>> {
        match self.users.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read_groups(&self) -> std::sync::RwLockReadGuard<'_, GroupIndex> {
        match self.groups.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_groups(&self) -> std::sync::RwLockWriteGuard<'_, GroupIndex> {
        match self.groups.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Replaces an entity's direct-membership set atomically.
    pub fn sync_direct_groups(&self, entity: &str, groups: Vec<String>) {
        let set: HashSet<String> = groups.into_iter().collect();
        self.write_users().insert(entity.to_string(), set);
    }

    /// Forgets an entity entirely.
    pub fn remove_entity(&self, entity: &str) {
        self.write_users().remove(entity);
    }

    /// Stores a group's rule, resolves it, registers reverse dependency
    /// edges, then cascade-reresolves every dependent group, visiting
    /// each at most once.
    ///
    /// # Errors
    ///
    /// [`ResolverError::InsufficientKnowledge`] when the rule references
    /// a group with no cached rule; the rule itself remains cached so a
    /// later sync of the missing dependency can pick it up.
    pub fn sync_group(
        &self,
        group: &str,
        include: Vec<String>,
        exclude: Vec<String>,
    ) -> Result<(), ResolverError> {
        {
            let mut index = self.write_groups();
            index
                .rules
                .insert(group.to_string(), GroupRule { include, exclude });
        }

        let expr = self.resolve_expr(group, &mut HashSet::new())?;
        self.store_expression(group, expr);

        // Re-resolve everything downstream, each descendant once, in
        // dependency order so a dependent is refreshed before anything
        // that embeds its expression.
        for dependent in self.dependents_of(group) {
            match self.resolve_expr(&dependent, &mut HashSet::new()) {
                Ok(expr) => self.store_expression(&dependent, expr),
                Err(ResolverError::InsufficientKnowledge(missing)) => {
                    tracing::warn!(
                        group = %dependent,
                        %missing,
                        "dependent group kept its stale expression"
                    );
                }
            }
        }
        Ok(())
    }

    /// Deletes a group from all four indexes and from every affectors
    /// set.
    pub fn remove_group(&self, group: &str) {
        let mut index = self.write_groups();
        index.rules.remove(group);
        index.expressions.remove(group);
        index.affectors.remove(group);
        for dependents in index.affectors.values_mut() {
            dependents.remove(group);
        }
    }

    /// (Re)computes and caches the group's expression.
    ///
    /// # Errors
    ///
    /// [`ResolverError::InsufficientKnowledge`] when a referenced group
    /// has no rule cached.
    pub fn resolve(&self, group: &str) -> Result<Expr, ResolverError> {
        let expr = self.resolve_expr(group, &mut HashSet::new())?;
        self.store_expression(group, expr.clone());
        Ok(expr)
    }

    /// Entities matching the group's expression.
    ///
    /// Returns an empty, sorted list for an unknown group. The universe
    /// evaluated is every entity whose direct-membership set intersects
    /// the groups the expression mentions.
    #[must_use]
    pub fn members_of_group(&self, group: &str) -> Vec<String> {
        let Some(expr) = self.read_groups().expressions.get(group).cloned() else {
            return Vec::new();
        };
        let mut mentioned = HashSet::new();
        expr.mentions(&mut mentioned);

        let users = self.read_users();
        let mut members: Vec<String> = users
            .iter()
            .filter(|(_, direct)| direct.iter().any(|g| mentioned.contains(g)))
            .filter(|(_, direct)| expr.eval(direct))
            .map(|(entity, _)| entity.clone())
            .collect();
        drop(users);
        members.sort();
        members
    }

    /// Groups whose expressions match the entity's direct-membership
    /// set. Returns an empty list for an unknown entity.
    #[must_use]
    pub fn groups_for_entity(&self, entity: &str) -> Vec<String> {
        let Some(direct) = self.read_users().get(entity).cloned() else {
            return Vec::new();
        };
        let index = self.read_groups();
        let mut groups: Vec<String> = index
            .expressions
            .iter()
            .filter(|(_, expr)| expr.eval(&direct))
            .map(|(name, _)| name.clone())
            .collect();
        drop(index);
        groups.sort();
        groups
    }

    /// Bulk-seeds rules at startup, then resolves each group once all
    /// rules are present so ordering does not matter.
    pub fn seed(&self, groups: Vec<(String, GroupRule)>) {
        let names: Vec<String> = {
            let mut index = self.write_groups();
            groups
                .into_iter()
                .map(|(name, rule)| {
                    index.rules.insert(name.clone(), rule);
                    name
                })
                .collect()
        };
        for name in names {
            match self.resolve_expr(&name, &mut HashSet::new()) {
                Ok(expr) => self.store_expression(&name, expr),
                Err(ResolverError::InsufficientKnowledge(missing)) => {
                    tracing::warn!(group = %name, %missing, "seed left group unresolved");
                }
            }
        }
    }

    /// Depth-first resolution of a group from its rule. The group lock
    /// is scoped to each fetch: it is dropped before recursing and
    /// reacquired afterwards.
    ///
    /// Referenced groups resolve through their CACHED expression when
    /// one exists; only unresolved references recurse into rules. The
    /// cache is what lets a deliberate reference loop (a group excluding
    /// one of its own dependents) terminate with the target's current
    /// expansion; the cascade refreshes stale entries afterwards.
    ///
    /// `active` guards against reference loops with no cache to break
    /// them (a cold seed of a looped topology): a group re-entered
    /// while its own resolution is in flight contributes its bare
    /// identifier.
    fn resolve_expr(
        &self,
        group: &str,
        active: &mut HashSet<String>,
    ) -> Result<Expr, ResolverError> {
        let rule = {
            let index = self.read_groups();
            index.rules.get(group).cloned()
        }
        .ok_or_else(|| ResolverError::InsufficientKnowledge(group.to_string()))?;

        if !active.insert(group.to_string()) {
            return Ok(Expr::Group(group.to_string()));
        }

        let result = (|| {
            let mut any = Vec::with_capacity(1 + rule.include.len());
            any.push(Expr::Group(group.to_string()));
            for inc in &rule.include {
                any.push(self.child_expr(inc, active)?);
            }

            let mut all = Vec::with_capacity(1 + rule.exclude.len());
            all.push(Expr::Any(any));
            for exc in &rule.exclude {
                all.push(Expr::Not(Box::new(self.child_expr(exc, active)?)));
            }
            Ok(Expr::All(all))
        })();
        active.remove(group);
        result
    }

    /// A referenced group's expression: cached if available, otherwise
    /// resolved from its rule.
    fn child_expr(
        &self,
        group: &str,
        active: &mut HashSet<String>,
    ) -> Result<Expr, ResolverError> {
        let cached = {
            let index = self.read_groups();
            index.expressions.get(group).cloned()
        };
        match cached {
            Some(expr) => Ok(expr),
            None => self.resolve_expr(group, active),
        }
    }

    /// Caches an expression and rewrites the reverse dependency edges to
    /// match what it now mentions.
    fn store_expression(&self, group: &str, expr: Expr) {
        let mut mentioned = HashSet::new();
        expr.mentions(&mut mentioned);
        mentioned.remove(group);

        let mut index = self.write_groups();
        index.expressions.insert(group.to_string(), expr);
        for dependents in index.affectors.values_mut() {
            dependents.remove(group);
        }
        for dep in mentioned {
            index
                .affectors
                .entry(dep)
                .or_default()
                .insert(group.to_string());
        }
    }

    /// Transitive closure over the affectors edges, ordered so that a
    /// dependent is listed before every group that depends on it. Each
    /// descendant appears at most once; members of a reference loop keep
    /// an arbitrary relative order (the expression cache breaks the
    /// loop during re-resolution).
    fn dependents_of(&self, group: &str) -> Vec<String> {
        let index = self.read_groups();

        // Collect the affected set breadth-first.
        let mut affected: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = index
            .affectors
            .get(group)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default();
        while let Some(next) = queue.pop_front() {
            if next == group || !affected.insert(next.clone()) {
                continue;
            }
            if let Some(deps) = index.affectors.get(&next) {
                queue.extend(deps.iter().cloned());
            }
        }

        // Kahn's algorithm over the edges internal to the affected set:
        // an edge b -> a means a depends on b, so b sorts first.
        let mut indegree: HashMap<String, usize> =
            affected.iter().map(|name| (name.clone(), 0)).collect();
        for source in &affected {
            if let Some(dependents) = index.affectors.get(source) {
                for target in dependents {
                    if let Some(count) = indegree.get_mut(target) {
                        *count += 1;
                    }
                }
            }
        }
        let mut ready: VecDeque<String> = indegree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| name.clone())
            .collect();
        let mut order = Vec::with_capacity(affected.len());
        while let Some(next) = ready.pop_front() {
            if let Some(dependents) = index.affectors.get(&next) {
                for target in dependents {
                    if let Some(count) = indegree.get_mut(target) {
                        *count -= 1;
                        if *count == 0 {
                            ready.push_back(target.clone());
                        }
                    }
                }
            }
            order.push(next);
        }
        // Loop participants never reach indegree zero; append them in
        // any order.
        if order.len() < affected.len() {
            let placed: HashSet<&String> = order.iter().collect();
            let mut leftovers: Vec<String> = affected
                .iter()
                .filter(|name| !placed.contains(name))
                .cloned()
                .collect();
            leftovers.sort();
            order.extend(leftovers);
        }
        order
    }
}
