use anyhow::Result;
use openjudge_core::domain::{ProblemId, SubmissionId, UserId, Verdict};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// 评测运行时对外广播的事件类型。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JudgeEvent {
    /// 提交已持久化并进入队列。
    SubmissionQueued {
        submission_id: SubmissionId,
        user_id: UserId,
        problem_id: ProblemId,
    },
    /// 工作线程开始评测。
    EvaluationStarted {
        submission_id: SubmissionId,
        worker_id: usize,
        attempt: u32,
    },
    /// 评测完成并写入裁决。
    SubmissionGraded {
        submission_id: SubmissionId,
        verdict: Verdict,
        passed_cases: usize,
        total_cases: usize,
    },
    /// 内部错误后重新排队。
    SubmissionRequeued {
        submission_id: SubmissionId,
        attempt: u32,
        reason: String,
    },
    /// 重试耗尽，标记为失败。
    SubmissionFailed {
        submission_id: SubmissionId,
        error: String,
    },
}

impl JudgeEvent {
    pub fn submission_id(&self) -> SubmissionId {
        match self {
            JudgeEvent::SubmissionQueued { submission_id, .. }
            | JudgeEvent::EvaluationStarted { submission_id, .. }
            | JudgeEvent::SubmissionGraded { submission_id, .. }
            | JudgeEvent::SubmissionRequeued { submission_id, .. }
            | JudgeEvent::SubmissionFailed { submission_id, .. } => *submission_id,
        }
    }
}

/// 基于 `tokio::broadcast` 的事件广播器。
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<JudgeEvent>,
}

impl EventBroadcaster {
    /// 创建事件广播器。
    ///
    /// `capacity` 表示内部广播队列容量。
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 广播一个事件；没有订阅者时直接丢弃。
    pub fn emit(&self, event: JudgeEvent) {
        let _ = self.sender.send(event);
    }

    /// 订阅事件流。
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
        }
    }
}

/// 事件接收流包装器。
#[derive(Debug)]
pub struct EventStream {
    receiver: broadcast::Receiver<JudgeEvent>,
}

impl EventStream {
    /// 异步接收下一条事件。
    pub async fn recv(&mut self) -> Result<JudgeEvent> {
        Ok(self.receiver.recv().await?)
    }

    /// 非阻塞尝试接收一条事件。
    pub fn try_recv(&mut self) -> Result<JudgeEvent> {
        Ok(self.receiver.try_recv()?)
    }
}
