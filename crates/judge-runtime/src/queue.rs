//! 有界、持久化的提交队列。
//!
//! 容量按"未完成"计算：排队中与运行中的提交都占用名额，直到 `complete`
//! 释放。入队前先写入存储，写入失败会归还名额。

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use openjudge_core::domain::{StatusUpdate, Submission, SubmissionId, SubmissionStatus};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::QueueError;
use crate::store::ResultStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub outstanding: usize,
    pub capacity: usize,
}

/// 启动恢复的结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub requeued: usize,
    pub failed: usize,
}

pub struct SubmissionQueue {
    store: Arc<dyn ResultStore>,
    pending: Mutex<VecDeque<Submission>>,
    notify: Notify,
    outstanding: AtomicUsize,
    capacity: usize,
    closed: AtomicBool,
}

impl SubmissionQueue {
    pub fn new(store: Arc<dyn ResultStore>, capacity: usize) -> Self {
        Self {
            store,
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            outstanding: AtomicUsize::new(0),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    /// 接纳新提交：先占名额，再持久化，最后入队。
    pub async fn enqueue(&self, submission: Submission) -> Result<SubmissionId, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        self.reserve_slot()?;

        if let Err(err) = self.store.save(&submission).await {
            self.release_slot();
            return Err(err.into());
        }

        let id = submission.id;
        self.push(submission);
        debug!(submission_id = %id, "submission enqueued");
        Ok(id)
    }

    /// 取出下一条提交；队列关闭后返回 `None`。
    pub async fn dequeue(&self) -> Option<Submission> {
        loop {
            let notified = self.notify.notified();
            if let Some(submission) = self.pop() {
                return Some(submission);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// 内部重试：保留原有名额重新入队。
    pub fn requeue(&self, submission: Submission) {
        debug!(submission_id = %submission.id, attempts = submission.attempts, "submission requeued");
        self.push(submission);
    }

    /// 提交进入终态后释放名额。
    pub fn complete(&self, id: SubmissionId) {
        let released = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
        if released.is_err() {
            warn!(submission_id = %id, "completed a submission without an outstanding slot");
        }
    }

    /// 重新载入上次运行遗留的未完成提交，绕过容量控制。
    ///
    /// 排队中的直接入队（已在内存队列中的跳过）；运行中的按剩余尝试次数
    /// 决定重新排队或标记失败。
    pub async fn recover(&self, max_attempts: u32) -> Result<RecoveryReport, QueueError> {
        let mut report = RecoveryReport::default();
        let pending: HashSet<SubmissionId> =
            self.lock_pending().iter().map(|submission| submission.id).collect();

        for submission in self.store.list_unfinished().await? {
            let restored = match submission.status {
                SubmissionStatus::Queued if pending.contains(&submission.id) => continue,
                SubmissionStatus::Queued => submission,
                SubmissionStatus::Running if submission.attempts < max_attempts => {
                    match self.store.transition(submission.id, StatusUpdate::requeue()).await {
                        Ok(requeued) => requeued,
                        Err(err) if err.is_conflict() => continue,
                        Err(err) => return Err(err.into()),
                    }
                }
                SubmissionStatus::Running => {
                    let failed = self
                        .store
                        .transition(
                            submission.id,
                            StatusUpdate::failed("judge stopped while evaluating this submission"),
                        )
                        .await;
                    match failed {
                        Ok(_) => report.failed += 1,
                        Err(err) if err.is_conflict() => {}
                        Err(err) => return Err(err.into()),
                    }
                    continue;
                }
                SubmissionStatus::Graded | SubmissionStatus::Failed => continue,
            };

            self.outstanding.fetch_add(1, Ordering::AcqRel);
            self.push(restored);
            report.requeued += 1;
        }

        if report != RecoveryReport::default() {
            info!(
                requeued = report.requeued,
                failed = report.failed,
                "recovered unfinished submissions"
            );
        }
        Ok(report)
    }

    /// 关闭队列并唤醒所有等待中的消费者。
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.lock_pending().len(),
            outstanding: self.outstanding.load(Ordering::Acquire),
            capacity: self.capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn reserve_slot(&self) -> Result<(), QueueError> {
        let capacity = self.capacity;
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < capacity).then_some(current + 1)
            })
            .map(|_| ())
            .map_err(|_| QueueError::Capacity { capacity })
    }

    fn release_slot(&self) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
    }

    fn push(&self, submission: Submission) {
        self.lock_pending().push_back(submission);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Submission> {
        self.lock_pending().pop_front()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, VecDeque<Submission>> {
        // 临界区内不会 panic，锁中毒时数据仍然完整。
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
