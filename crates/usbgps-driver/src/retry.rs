//! 重试预算

/// 一次失败后的决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 延迟后重连；`remaining` 是本次失败时报告给用户的剩余次数
    Retry { remaining: u32 },
    /// 预算已用完
    Exhausted,
}

/// 连续失败计数
///
/// 每次失败先以当前剩余次数进入 `Retrying{remaining}`：剩余次数大于 0 时扣减并重连，
/// 等于 0 时停止。`max_retries = 2` 时连续失败的序列为
/// `Retrying(2) → Retrying(1) → Retrying(0) → FatalStopped`。
///
/// 任何连接产生第一帧有效数据时调用 [`reset`](Self::reset)。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    max_retries: u32,
    remaining: u32,
}

impl RetryBudget {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            remaining: max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn reset(&mut self) {
        self.remaining = self.max_retries;
    }

    /// 记录一次失败
    pub fn on_failure(&mut self) -> RetryDecision {
        if self.remaining == 0 {
            return RetryDecision::Exhausted;
        }
        let reported = self.remaining;
        self.remaining -= 1;
        RetryDecision::Retry { remaining: reported }
    }
}
