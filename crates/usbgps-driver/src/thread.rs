//! 后台线程工具

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, bounded};

use crate::error::LinkError;

/// 带超时的线程 join
pub(crate) trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        let (tx, rx) = bounded(1);

        // 看门狗线程代为 join；超时后它继续等待，进程退出时由系统回收
        let watchdog = std::thread::Builder::new()
            .name("usbgps-join".into())
            .spawn(move || {
                let _ = tx.send(self.join().map(|_| ()));
            });
        if let Err(e) = watchdog {
            return Err(Box::new(e));
        }

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// 创建命名线程
pub(crate) fn spawn_named<F, T>(name: &str, f: F) -> Result<JoinHandle<T>, LinkError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|e| LinkError::Thread(format!("failed to spawn {name} thread: {e}")))
}
