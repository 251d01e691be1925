//! Expression search over entities and groups.
//!
//! A small in-memory index holds redacted copies of every record, kept
//! fresh by the KV store's event stream. Queries are whitespace-joined
//! terms, all of which must match:
//!
//! - `field:pattern` matches one field with shell-style wildcards
//! - a bare pattern matches the record's identifier
//! - `"*"` alone matches every record
//!
//! Entity fields: `id`, `number`, `displayName`, `legalName`, `shell`,
//! `home`, `primaryGroup`. Group fields: `name`, `number`,
//! `displayName`, `managedBy`.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::errors::{Error, Result};
use crate::proto::{Entity, Group};

/// In-memory search index over redacted records.
#[derive(Default)]
pub struct SearchIndex {
    entities: RwLock<HashMap<String, Entity>>,
    groups: RwLock<HashMap<String, Group>>,
}

impl SearchIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or refreshes an entity record. The stored copy is
    /// redacted; the index never holds secret material.
    pub fn index_entity(&self, entity: &Entity) {
        let mut entities = match self.entities.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entities.insert(entity.id.clone(), entity.redacted());
    }

    /// Drops an entity from the index.
    pub fn remove_entity(&self, id: &str) {
        let mut entities = match self.entities.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entities.remove(id);
    }

    /// Inserts or refreshes a group record.
    pub fn index_group(&self, group: &Group) {
        let mut groups = match self.groups.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        groups.insert(group.name.clone(), group.clone());
    }

    /// Drops a group from the index.
    pub fn remove_group(&self, name: &str) {
        let mut groups = match self.groups.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        groups.remove(name);
    }

    /// Entities matching `expression`, sorted by ID.
    ///
    /// A term naming a field the record type does not carry matches
    /// nothing.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedRequest`] for an empty expression or an empty
    /// pattern.
    pub fn search_entities(&self, expression: &str) -> Result<Vec<Entity>> {
        let query = Query::parse(expression)?;
        let entities = match self.entities.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut hits: Vec<Entity> = entities
            .values()
            .filter(|e| query.matches(&entity_fields(e)))
            .cloned()
            .collect();
        drop(entities);
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(hits)
    }

    /// Groups matching `expression`, sorted by name.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedRequest`] for an empty expression or an empty
    /// pattern.
    pub fn search_groups(&self, expression: &str) -> Result<Vec<Group>> {
        let query = Query::parse(expression)?;
        let groups = match self.groups.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut hits: Vec<Group> = groups
            .values()
            .filter(|g| query.matches(&group_fields(g)))
            .cloned()
            .collect();
        drop(groups);
        hits.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(hits)
    }
}

fn entity_fields(entity: &Entity) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("id", entity.id.clone()),
        ("number", entity.number.to_string()),
    ];
    if let Some(meta) = &entity.meta {
        fields.push(("displayName", meta.display_name.clone()));
        fields.push(("legalName", meta.legal_name.clone()));
        fields.push(("shell", meta.shell.clone()));
        fields.push(("home", meta.home.clone()));
        fields.push(("primaryGroup", meta.primary_group.clone()));
    }
    fields
}

fn group_fields(group: &Group) -> Vec<(&'static str, String)> {
    vec![
        ("name", group.name.clone()),
        ("number", group.number.to_string()),
        ("displayName", group.display_name.clone()),
        ("managedBy", group.managed_by.clone()),
    ]
}

/// One parsed term: an optional field selector and a compiled pattern.
struct Term {
    field: Option<String>,
    pattern: regex::Regex,
}

/// A conjunction of terms.
struct Query {
    terms: Vec<Term>,
}

impl Query {
    fn parse(expression: &str) -> Result<Self> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(Error::MalformedRequest);
        }
        let mut terms = Vec::new();
        for raw in expression.split_whitespace() {
            let (field, pattern) = match raw.split_once(':') {
                Some((field, pattern)) if !field.is_empty() => {
                    (Some(field.to_string()), pattern)
                }
                _ => (None, raw),
            };
            if pattern.is_empty() {
                return Err(Error::MalformedRequest);
            }
            terms.push(Term {
                field,
                pattern: compile_glob(pattern)?,
            });
        }
        Ok(Self { terms })
    }

    fn matches(&self, fields: &[(&'static str, String)]) -> bool {
        self.terms.iter().all(|term| match &term.field {
            Some(name) => fields
                .iter()
                .any(|(field, value)| *field == name.as_str() && term.pattern.is_match(value)),
            // Bare terms match the identifier, which is always the
            // first field.
            None => fields
                .first()
                .is_some_and(|(_, value)| term.pattern.is_match(value)),
        })
    }
}

fn compile_glob(pattern: &str) -> Result<regex::Regex> {
    let mut regex = String::with_capacity(pattern.len() * 2 + 4);
    regex.push_str("(?i)^");
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    regex::Regex::new(&regex).map_err(|_| Error::MalformedRequest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::EntityMeta;

    fn entity(id: &str, shell: &str, display: &str) -> Entity {
        Entity {
            id: id.to_string(),
            number: 1,
            secret: "hashed".to_string(),
            meta: Some(EntityMeta {
                shell: shell.to_string(),
                display_name: display.to_string(),
                ..EntityMeta::default()
            }),
        }
    }

    fn index_with_fixtures() -> SearchIndex {
        let index = SearchIndex::new();
        index.index_entity(&entity("alice", "/bin/zsh", "Alice A"));
        index.index_entity(&entity("bob", "/bin/bash", "Bob B"));
        index.index_group(&Group {
            name: "ops".to_string(),
            number: 10,
            display_name: "Operations".to_string(),
            managed_by: "root-admins".to_string(),
            ..Group::default()
        });
        index
    }

    #[test]
    fn star_matches_everything() {
        let index = index_with_fixtures();
        assert_eq!(index.search_entities("*").unwrap().len(), 2);
        assert_eq!(index.search_groups("*").unwrap().len(), 1);
    }

    #[test]
    fn bare_terms_match_the_identifier() {
        let index = index_with_fixtures();
        let hits = index.search_entities("ali*").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "alice");
    }

    #[test]
    fn field_terms_and_conjunction() {
        let index = index_with_fixtures();
        assert_eq!(index.search_entities("shell:*bash").unwrap().len(), 1);
        assert_eq!(
            index
                .search_entities("shell:/bin/* displayName:Alice*")
                .unwrap()
                .len(),
            1
        );
        assert!(index
            .search_entities("shell:*bash displayName:Alice*")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn group_fields_match() {
        let index = index_with_fixtures();
        let hits = index.search_groups("managedBy:root-admins").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "ops");
    }

    #[test]
    fn results_are_redacted() {
        let index = index_with_fixtures();
        for hit in index.search_entities("*").unwrap() {
            assert!(hit.secret.is_empty());
        }
    }

    #[test]
    fn removal_hides_records() {
        let index = index_with_fixtures();
        index.remove_entity("alice");
        index.remove_group("ops");
        assert_eq!(index.search_entities("*").unwrap().len(), 1);
        assert!(index.search_groups("*").unwrap().is_empty());
    }

    #[test]
    fn empty_expression_is_malformed() {
        let index = index_with_fixtures();
        assert_eq!(
            index.search_entities("").unwrap_err(),
            Error::MalformedRequest
        );
        assert_eq!(
            index.search_entities("  "),
            Err(Error::MalformedRequest)
        );
    }

    #[test]
    fn matching_is_case_insensitive() {
        let index = index_with_fixtures();
        assert_eq!(index.search_entities("ALICE").unwrap().len(), 1);
    }
}
