/// Mutations and commit outcomes

use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::key::Key;
use serde::{Deserialize, Serialize};

/// How an entity write treats existing data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationMethod {
    /// Fails if the entity already exists
    Insert,
    /// Fails if the entity does not exist
    Update,
    /// Creates or replaces
    Upsert,
}

impl MutationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationMethod::Insert => "insert",
            MutationMethod::Update => "update",
            MutationMethod::Upsert => "upsert",
        }
    }
}

/// An entity write with an explicit method
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    pub method: MutationMethod,
    pub entity: Entity,
}

impl Write {
    pub fn insert(entity: Entity) -> Self {
        Self::with_method(MutationMethod::Insert, entity)
    }

    pub fn update(entity: Entity) -> Self {
        Self::with_method(MutationMethod::Update, entity)
    }

    pub fn upsert(entity: Entity) -> Self {
        Self::with_method(MutationMethod::Upsert, entity)
    }

    pub fn with_method(method: MutationMethod, entity: Entity) -> Self {
        Self { method, entity }
    }
}

impl From<Entity> for Write {
    /// Complete keys upsert; incomplete keys insert with an allocated id
    fn from(entity: Entity) -> Self {
        if entity.key.is_complete() {
            Write::upsert(entity)
        } else {
            Write::insert(entity)
        }
    }
}

/// One element of a commit
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Insert(Entity),
    Update(Entity),
    Upsert(Entity),
    Delete(Key),
}

impl Mutation {
    pub fn key(&self) -> &Key {
        match self {
            Mutation::Insert(e) | Mutation::Update(e) | Mutation::Upsert(e) => &e.key,
            Mutation::Delete(k) => k,
        }
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            Mutation::Insert(_) => "insert",
            Mutation::Update(_) => "update",
            Mutation::Upsert(_) => "upsert",
            Mutation::Delete(_) => "delete",
        }
    }

    /// Only inserts may carry an incomplete key
    pub fn validate(&self) -> Result<()> {
        match self {
            Mutation::Insert(e) => e.key.validate(),
            other => other.key().ensure_complete(other.op_name()),
        }
    }
}

impl From<Write> for Mutation {
    fn from(write: Write) -> Self {
        match write.method {
            MutationMethod::Insert => Mutation::Insert(write.entity),
            MutationMethod::Update => Mutation::Update(write.entity),
            MutationMethod::Upsert => Mutation::Upsert(write.entity),
        }
    }
}

/// Outcome of one applied mutation
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResult {
    /// Allocated key, present only when the mutation's key was incomplete
    pub key: Option<Key>,
    pub version: i64,
    pub conflict_detected: bool,
}

/// Outcome of a commit, one entry per mutation in submission order
#[derive(Debug, Clone, PartialEq)]
pub struct CommitResult {
    pub mutation_results: Vec<Result<MutationResult>>,
    pub index_updates: u32,
}

impl CommitResult {
    pub fn len(&self) -> usize {
        self.mutation_results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutation_results.is_empty()
    }

    pub fn is_success(&self) -> bool {
        self.mutation_results.iter().all(|r| r.is_ok())
    }

    /// Failed mutations with their submission index
    pub fn errors(&self) -> Vec<(usize, &Error)> {
        self.mutation_results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().err().map(|e| (i, e)))
            .collect()
    }

    /// Keys allocated for incomplete keys, in submission order
    pub fn allocated_keys(&self) -> Vec<&Key> {
        self.mutation_results
            .iter()
            .filter_map(|r| r.as_ref().ok().and_then(|m| m.key.as_ref()))
            .collect()
    }

    /// First failure, if any
    pub fn into_result(self) -> Result<Vec<MutationResult>> {
        self.mutation_results.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityData;

    #[test]
    fn test_write_default_method() {
        let complete = Entity::new(Key::new("Task", 1), EntityData::new());
        let incomplete = Entity::new(Key::incomplete("Task"), EntityData::new());
        assert_eq!(Write::from(complete).method, MutationMethod::Upsert);
        assert_eq!(Write::from(incomplete).method, MutationMethod::Insert);
    }

    #[test]
    fn test_incomplete_key_only_for_insert() {
        let entity = Entity::new(Key::incomplete("Task"), EntityData::new());
        assert!(Mutation::Insert(entity.clone()).validate().is_ok());
        assert!(Mutation::Upsert(entity.clone()).validate().is_err());
        assert!(Mutation::Update(entity).validate().is_err());
        assert!(Mutation::Delete(Key::incomplete("Task")).validate().is_err());
    }

    #[test]
    fn test_commit_result_helpers() {
        let result = CommitResult {
            mutation_results: vec![
                Ok(MutationResult {
                    key: Some(Key::new("Task", 9)),
                    version: 1,
                    conflict_detected: false,
                }),
                Err(Error::MutationConflict("entity already exists".into())),
            ],
            index_updates: 2,
        };
        assert!(!result.is_success());
        assert_eq!(result.errors().len(), 1);
        assert_eq!(result.errors()[0].0, 1);
        assert_eq!(result.allocated_keys(), vec![&Key::new("Task", 9)]);
        assert!(result.into_result().is_err());
    }
}
