//! 链路状态机
//!
//! ```text
//! Disabled ──enable──> AwaitingPermission ──granted──> Negotiating ──first frame──> Streaming
//!                              │                           │  ▲                        │
//!                              │ denied                    │  │ retry delay            │ idle / closed
//!                              ▼                           ▼  │                        ▼
//!                        FatalStopped <──budget exhausted── Retrying{remaining} <──────┘
//! ```
//!
//! 任何状态都可以通过 `disable()` 回到 `Disabled`。

use std::fmt;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::LinkError;

/// 链路状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkState {
    #[default]
    Disabled,
    AwaitingPermission,
    Negotiating,
    Streaming,
    Retrying {
        remaining: u32,
    },
    FatalStopped,
}

impl LinkState {
    /// 链路是否处于运行周期内（`enable()` 之后、停止之前）
    pub fn is_active(&self) -> bool {
        !matches!(self, LinkState::Disabled | LinkState::FatalStopped)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disabled => write!(f, "disabled"),
            LinkState::AwaitingPermission => write!(f, "awaiting permission"),
            LinkState::Negotiating => write!(f, "negotiating"),
            LinkState::Streaming => write!(f, "streaming"),
            LinkState::Retrying { remaining } => write!(f, "retrying ({remaining} left)"),
            LinkState::FatalStopped => write!(f, "fatal stop"),
        }
    }
}

/// 带条件变量的状态单元
///
/// 所有状态变更都经过这里，等待 `Streaming` 的写入方在状态变化时被唤醒。
/// 每次变更递增版本号，等待方据此区分“仍是同一个 Streaming”和“新的 Streaming”。
#[derive(Debug, Default)]
pub struct StateCell {
    slot: Mutex<Slot>,
    changed: Condvar,
}

#[derive(Debug, Default)]
struct Slot {
    state: LinkState,
    version: u64,
}

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> LinkState {
        self.slot.lock().state
    }

    /// 无条件设置状态，返回旧值（未变化时返回 `None`）
    pub fn set(&self, new: LinkState) -> Option<LinkState> {
        let mut slot = self.slot.lock();
        self.replace(&mut slot, new)
    }

    /// 只在链路仍处于运行周期内时设置状态
    ///
    /// 后台线程的状态变更与 `disable()` 可能并发，已停止的链路不能被后台线程重新激活。
    pub fn set_if_active(&self, new: LinkState) -> Result<Option<LinkState>, LinkState> {
        let mut slot = self.slot.lock();
        if !slot.state.is_active() {
            return Err(slot.state);
        }
        Ok(self.replace(&mut slot, new))
    }

    fn replace(&self, slot: &mut Slot, new: LinkState) -> Option<LinkState> {
        if slot.state == new {
            return None;
        }
        let old = std::mem::replace(&mut slot.state, new);
        slot.version += 1;
        self.changed.notify_all();
        Some(old)
    }

    /// 阻塞直到进入 `Streaming`，返回此时的状态版本
    ///
    /// 链路停止（`Disabled` / `FatalStopped`）时返回 [`LinkError::Disabled`]，
    /// 超过 `deadline` 返回 [`LinkError::Timeout`]。
    pub fn wait_until_streaming(&self, deadline: Option<Instant>) -> Result<u64, LinkError> {
        let mut slot = self.slot.lock();
        loop {
            match slot.state {
                LinkState::Streaming => return Ok(slot.version),
                LinkState::Disabled | LinkState::FatalStopped => return Err(LinkError::Disabled),
                _ => {},
            }
            self.wait(&mut slot, deadline)?;
        }
    }

    /// 阻塞直到状态版本不再等于 `version`
    pub fn wait_for_change(&self, version: u64, deadline: Option<Instant>) -> Result<(), LinkError> {
        let mut slot = self.slot.lock();
        while slot.version == version {
            self.wait(&mut slot, deadline)?;
        }
        Ok(())
    }

    fn wait(&self, slot: &mut MutexGuard<'_, Slot>, deadline: Option<Instant>) -> Result<(), LinkError> {
        match deadline {
            Some(deadline) => {
                let version = slot.version;
                if self.changed.wait_until(slot, deadline).timed_out() && slot.version == version {
                    return Err(LinkError::Timeout);
                }
            },
            None => self.changed.wait(slot),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_set_reports_change() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), LinkState::Disabled);
        assert_eq!(cell.set(LinkState::Negotiating), Some(LinkState::Disabled));
        assert_eq!(cell.set(LinkState::Negotiating), None);
    }

    #[test]
    fn test_set_if_active_refuses_after_disable() {
        let cell = StateCell::new();
        assert_eq!(cell.set_if_active(LinkState::Streaming), Err(LinkState::Disabled));

        cell.set(LinkState::Negotiating);
        assert_eq!(
            cell.set_if_active(LinkState::Retrying { remaining: 1 }),
            Ok(Some(LinkState::Negotiating))
        );
        cell.set(LinkState::FatalStopped);
        assert!(cell.set_if_active(LinkState::Negotiating).is_err());
    }

    #[test]
    fn test_wait_until_streaming_wakes() {
        let cell = Arc::new(StateCell::new());
        cell.set(LinkState::Negotiating);

        let waiter = {
            let cell = cell.clone();
            std::thread::spawn(move || cell.wait_until_streaming(None))
        };
        std::thread::sleep(Duration::from_millis(20));
        cell.set(LinkState::Retrying { remaining: 2 });
        std::thread::sleep(Duration::from_millis(20));
        cell.set(LinkState::Streaming);
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_wait_until_streaming_fails_on_stop() {
        let cell = Arc::new(StateCell::new());
        cell.set(LinkState::Negotiating);

        let waiter = {
            let cell = cell.clone();
            std::thread::spawn(move || cell.wait_until_streaming(None))
        };
        std::thread::sleep(Duration::from_millis(20));
        cell.set(LinkState::FatalStopped);
        assert!(matches!(waiter.join().unwrap(), Err(LinkError::Disabled)));

        // 未启动的链路立即失败
        let idle = StateCell::new();
        assert!(matches!(idle.wait_until_streaming(None), Err(LinkError::Disabled)));
    }

    #[test]
    fn test_wait_until_streaming_timeout() {
        let cell = StateCell::new();
        cell.set(LinkState::AwaitingPermission);
        let deadline = Instant::now() + Duration::from_millis(30);
        assert!(matches!(cell.wait_until_streaming(Some(deadline)), Err(LinkError::Timeout)));
    }

    #[test]
    fn test_wait_for_change() {
        let cell = Arc::new(StateCell::new());
        cell.set(LinkState::Negotiating);
        cell.set(LinkState::Streaming);
        let version = cell.wait_until_streaming(None).unwrap();

        // 同一个 Streaming 期间不会返回
        let deadline = Instant::now() + Duration::from_millis(30);
        assert!(matches!(cell.wait_for_change(version, Some(deadline)), Err(LinkError::Timeout)));

        let waiter = {
            let cell = cell.clone();
            std::thread::spawn(move || cell.wait_for_change(version, None))
        };
        std::thread::sleep(Duration::from_millis(20));
        cell.set(LinkState::Retrying { remaining: 1 });
        assert!(waiter.join().unwrap().is_ok());

        // 重新进入 Streaming 得到新的版本
        cell.set(LinkState::Streaming);
        assert!(cell.wait_until_streaming(None).unwrap() > version);
    }

    #[test]
    fn test_display() {
        assert_eq!(LinkState::Retrying { remaining: 3 }.to_string(), "retrying (3 left)");
        assert!(LinkState::Streaming.is_active());
        assert!(!LinkState::FatalStopped.is_active());
    }
}
