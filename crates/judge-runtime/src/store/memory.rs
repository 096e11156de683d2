use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use openjudge_core::domain::{StatusUpdate, Submission, SubmissionId, UserId};
use tokio::sync::RwLock;

use super::{Page, PageRequest, ResultStore, StoreResult};
use crate::error::StoreError;

/// 进程内存储。记录以 `Arc` 保存，更新时整体替换，读者只会拿到完整快照。
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    records: RwLock<HashMap<SubmissionId, Arc<Submission>>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<Submission> {
        self.records
            .read()
            .await
            .values()
            .map(|record| Submission::clone(record))
            .collect()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn save(&self, submission: &Submission) -> StoreResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&submission.id) {
            return Err(StoreError::Duplicate(submission.id));
        }
        records.insert(submission.id, Arc::new(submission.clone()));
        Ok(())
    }

    async fn get(&self, id: SubmissionId) -> StoreResult<Submission> {
        self.records
            .read()
            .await
            .get(&id)
            .map(|record| Submission::clone(record))
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_by_user(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> StoreResult<Page<Submission>> {
        let records = self.records.read().await;
        let mut owned: Vec<&Arc<Submission>> = records
            .values()
            .filter(|record| record.user_id == user_id)
            .collect();
        owned.sort_by(|a, b| {
            b.submitted_at
                .cmp(&a.submitted_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = owned.len() as u64;
        let items = owned
            .into_iter()
            .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
            .take(usize::try_from(page.per_page()).unwrap_or(usize::MAX))
            .map(|record| Submission::clone(record))
            .collect();

        Ok(Page {
            items,
            total,
            page: page.page(),
            per_page: page.per_page(),
        })
    }

    async fn transition(&self, id: SubmissionId, update: StatusUpdate) -> StoreResult<Submission> {
        let mut records = self.records.write().await;
        let current = records.get(&id).ok_or(StoreError::NotFound(id))?;
        let next = current.apply(&update)?;
        records.insert(id, Arc::new(next.clone()));
        Ok(next)
    }

    async fn list_unfinished(&self) -> StoreResult<Vec<Submission>> {
        let records = self.records.read().await;
        let mut unfinished: Vec<Submission> = records
            .values()
            .filter(|record| !record.status.is_terminal())
            .map(|record| Submission::clone(record))
            .collect();
        unfinished.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(unfinished)
    }
}
