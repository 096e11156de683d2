//! 提交记录的持久化接口。

mod memory;

pub use memory::MemoryResultStore;

use async_trait::async_trait;
use openjudge_core::domain::{StatusUpdate, Submission, SubmissionId, UserId};

use crate::error::StoreError;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// 分页参数，页码从 1 开始。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u64,
    per_page: u64,
}

impl PageRequest {
    pub const DEFAULT_PER_PAGE: u64 = 20;
    pub const MAX_PER_PAGE: u64 = 100;

    /// 越界的参数会被收敛到合法范围。
    pub fn new(page: u64, per_page: u64) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn per_page(&self) -> u64 {
        self.per_page
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_PER_PAGE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

impl<T> Page<T> {
    pub fn pages(&self) -> u64 {
        self.total.div_ceil(self.per_page.max(1))
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// 提交记录存储。
///
/// `transition` 必须是原子的比较并交换：当前状态与 `expected` 不一致时返回冲突，
/// 且状态、裁决、尝试次数与报告一起更新，读者不会看到中间状态。
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save(&self, submission: &Submission) -> StoreResult<()>;

    async fn get(&self, id: SubmissionId) -> StoreResult<Submission>;

    /// 按提交时间倒序返回某个用户的提交。
    async fn list_by_user(&self, user_id: UserId, page: PageRequest)
    -> StoreResult<Page<Submission>>;

    async fn transition(&self, id: SubmissionId, update: StatusUpdate) -> StoreResult<Submission>;

    /// 排队中或运行中的提交，按提交时间正序，用于启动恢复。
    async fn list_unfinished(&self) -> StoreResult<Vec<Submission>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_is_clamped() {
        let request = PageRequest::new(0, 500);
        assert_eq!(request.page(), 1);
        assert_eq!(request.per_page(), PageRequest::MAX_PER_PAGE);
        assert_eq!(request.offset(), 0);

        assert_eq!(PageRequest::new(3, 20).offset(), 40);
        assert_eq!(PageRequest::default().per_page(), 20);
    }

    #[test]
    fn page_count_rounds_up() {
        let page = Page {
            items: vec![1, 2],
            total: 41,
            page: 1,
            per_page: 20,
        };
        assert_eq!(page.pages(), 3);

        let empty: Page<u8> = Page {
            items: Vec::new(),
            total: 0,
            page: 1,
            per_page: 20,
        };
        assert_eq!(empty.pages(), 0);
    }
}
