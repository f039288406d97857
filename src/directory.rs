//! Test → group lookup used by the `group_id` list filter.
//!
//! Tests and groups are owned by the surrounding CRUD layer; the engine only
//! needs to know which tests belong to a group.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::model::{GroupId, TestId};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("test directory unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TestDirectory: Send + Sync {
    /// Ids of every test in `group_id`. An unknown group has no tests.
    async fn tests_in_group(&self, group_id: GroupId) -> Result<Vec<TestId>, DirectoryError>;
}

/// Directory kept in memory, fed by whoever owns test definitions.
#[derive(Default)]
pub struct InMemoryTestDirectory {
    groups: DashMap<TestId, GroupId>,
}

impl InMemoryTestDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or move) a test into a group.
    pub fn register_test(&self, test_id: TestId, group_id: GroupId) {
        self.groups.insert(test_id, group_id);
    }

    pub fn remove_test(&self, test_id: TestId) -> Option<GroupId> {
        self.groups.remove(&test_id).map(|(_, g)| g)
    }

    pub fn group_of(&self, test_id: TestId) -> Option<GroupId> {
        self.groups.get(&test_id).map(|e| *e.value())
    }
}

#[async_trait]
impl TestDirectory for InMemoryTestDirectory {
    async fn tests_in_group(&self, group_id: GroupId) -> Result<Vec<TestId>, DirectoryError> {
        let mut tests: Vec<TestId> = self
            .groups
            .iter()
            .filter(|e| *e.value() == group_id)
            .map(|e| *e.key())
            .collect();
        tests.sort_unstable();
        Ok(tests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn groups_tests() {
        let dir = InMemoryTestDirectory::new();
        dir.register_test(10, 1);
        dir.register_test(11, 1);
        dir.register_test(20, 2);

        assert_eq!(dir.tests_in_group(1).await.unwrap(), vec![10, 11]);
        assert_eq!(dir.tests_in_group(2).await.unwrap(), vec![20]);
        assert!(dir.tests_in_group(3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reregister_moves_test() {
        let dir = InMemoryTestDirectory::new();
        dir.register_test(10, 1);
        dir.register_test(10, 2);
        assert!(dir.tests_in_group(1).await.unwrap().is_empty());
        assert_eq!(dir.group_of(10), Some(2));
        assert_eq!(dir.remove_test(10), Some(2));
        assert_eq!(dir.group_of(10), None);
    }
}
