//! 事件分发
//!
//! 读线程把帧投递到一个无界队列，由单独的分发线程按顺序交给监听器，
//! 监听器再慢也不会阻塞读循环。同一线程还负责把帧合并成定位结果并交给
//! [`LocationSink`]，以及每个连接一次的时钟校准。
//!
//! # 使用示例
//!
//! ```rust
//! use usbgps_driver::dispatcher::ListenerRegistry;
//! use usbgps_protocol::Frame;
//! use std::sync::Arc;
//!
//! let registry = ListenerRegistry::new();
//! let id = registry.add_frame_listener(Arc::new(|frame: &Frame| {
//!     println!("{}", frame);
//! }));
//! assert_eq!(registry.frame_listener_count(), 1);
//! assert!(registry.remove_frame_listener(id));
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, error, trace, warn};
use usbgps_protocol::{FixAssembler, Frame};

use crate::error::LinkError;
use crate::metrics::LinkMetrics;
use crate::sinks::{ClockSetter, DiagnosticsSink, LocationSink};
use crate::state::LinkState;
use crate::thread::JoinTimeout;

/// 链路事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    StateChanged(LinkState),
    /// 协商得到的线速率
    SpeedSelected(u32),
    /// 之前报告的瞬态问题已消失
    ProblemCleared,
}

/// 帧监听器
///
/// 在分发线程上调用；实现中的 panic 会被捕获并记录，不影响其它监听器。
pub trait FrameListener: Send + Sync {
    fn on_frame(&self, frame: &Frame);
}

/// 链路事件监听器
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &LinkEvent);
}

impl<F> FrameListener for F
where
    F: Fn(&Frame) + Send + Sync,
{
    fn on_frame(&self, frame: &Frame) {
        self(frame)
    }
}

impl<F> EventListener for F
where
    F: Fn(&LinkEvent) + Send + Sync,
{
    fn on_event(&self, event: &LinkEvent) {
        self(event)
    }
}

/// 监听器句柄，用于注销
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Entries<T> = Vec<(ListenerId, Arc<T>)>;

/// 监听器注册表
///
/// 分发线程每次投递前无锁读取快照（`ArcSwap::load`），注册和注销用 RCU 替换整个列表。
/// 投递过程中注销的监听器最多再收到当前这一个事件。
pub struct ListenerRegistry {
    next_id: AtomicU64,
    frames: ArcSwap<Entries<dyn FrameListener>>,
    events: ArcSwap<Entries<dyn EventListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            frames: ArcSwap::from_pointee(Vec::new()),
            events: ArcSwap::from_pointee(Vec::new()),
        }
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn add_frame_listener(&self, listener: Arc<dyn FrameListener>) -> ListenerId {
        let id = self.next_id();
        self.frames.rcu(|old| {
            let mut list = (**old).clone();
            list.push((id, listener.clone()));
            list
        });
        id
    }

    pub fn remove_frame_listener(&self, id: ListenerId) -> bool {
        remove(&self.frames, id)
    }

    pub fn add_event_listener(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = self.next_id();
        self.events.rcu(|old| {
            let mut list = (**old).clone();
            list.push((id, listener.clone()));
            list
        });
        id
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        remove(&self.events, id)
    }

    pub fn frame_listener_count(&self) -> usize {
        self.frames.load().len()
    }

    pub fn event_listener_count(&self) -> usize {
        self.events.load().len()
    }

    pub fn clear(&self) {
        self.frames.store(Arc::new(Vec::new()));
        self.events.store(Arc::new(Vec::new()));
    }

    fn frame_listeners(&self) -> Arc<Entries<dyn FrameListener>> {
        self.frames.load_full()
    }

    fn event_listeners(&self) -> Arc<Entries<dyn EventListener>> {
        self.events.load_full()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn remove<T: ?Sized>(slot: &ArcSwap<Entries<T>>, id: ListenerId) -> bool {
    let mut removed = false;
    slot.rcu(|old| {
        let list: Entries<T> = old.iter().filter(|(entry, _)| *entry != id).cloned().collect();
        removed = list.len() != old.len();
        list
    });
    removed
}

/// 分发队列中的消息
#[derive(Debug)]
pub(crate) enum Dispatch {
    Frame(Frame),
    Event(LinkEvent),
    /// 新连接建立：清空未完成的历元，重新允许一次时钟校准
    ConnectionOpened,
    Shutdown,
}

/// 分发线程依赖的外部协作方
pub(crate) struct DispatchContext {
    pub registry: Arc<ListenerRegistry>,
    pub location: Arc<dyn LocationSink>,
    /// 问题清除的通知在这里发出，不占用读线程
    pub diagnostics: Arc<dyn DiagnosticsSink>,
    pub clock: Option<Arc<dyn ClockSetter>>,
    pub metrics: Arc<LinkMetrics>,
}

/// 分发线程
pub(crate) struct EventDispatcher {
    tx: Sender<Dispatch>,
    handle: Option<JoinHandle<()>>,
}

impl EventDispatcher {
    pub fn spawn(ctx: DispatchContext) -> Result<Self, LinkError> {
        let (tx, rx) = unbounded();
        let handle = std::thread::Builder::new()
            .name("usbgps-dispatch".into())
            .spawn(move || dispatch_loop(rx, ctx))
            .map_err(|e| LinkError::Thread(format!("failed to spawn dispatch thread: {e}")))?;
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    pub fn sender(&self) -> Sender<Dispatch> {
        self.tx.clone()
    }

    /// 投递队列中剩余的消息后停止
    pub fn shutdown(mut self, timeout: Duration) {
        let _ = self.tx.send(Dispatch::Shutdown);
        if let Some(handle) = self.handle.take()
            && handle.join_timeout(timeout).is_err()
        {
            error!("Dispatch thread did not stop within {:?}", timeout);
        }
    }
}

fn dispatch_loop(rx: Receiver<Dispatch>, ctx: DispatchContext) {
    let mut assembler = FixAssembler::new();
    let mut clock_armed = true;

    while let Ok(message) = rx.recv() {
        match message {
            Dispatch::Frame(frame) => {
                for (_, listener) in ctx.registry.frame_listeners().iter() {
                    guarded(&ctx.metrics, "frame listener", || listener.on_frame(&frame));
                }

                if let Some(fix) = assembler.push(&frame) {
                    trace!("Assembled fix at {}", fix.timestamp_ms);
                    guarded(&ctx.metrics, "location sink", || ctx.location.report_fix(&fix));
                    if clock_armed && let Some(clock) = &ctx.clock {
                        clock_armed = false;
                        debug!("Setting system clock from GPS time {}", fix.timestamp_ms);
                        guarded(&ctx.metrics, "clock setter", || clock.set_time(fix.timestamp_ms));
                    }
                }
            },
            Dispatch::Event(event) => {
                if event == LinkEvent::ProblemCleared {
                    guarded(&ctx.metrics, "diagnostics sink", || ctx.diagnostics.problem_cleared());
                }
                for (_, listener) in ctx.registry.event_listeners().iter() {
                    guarded(&ctx.metrics, "event listener", || listener.on_event(&event));
                }
            },
            Dispatch::ConnectionOpened => {
                assembler.reset();
                clock_armed = true;
            },
            Dispatch::Shutdown => break,
        }
    }
    trace!("Dispatch thread exiting");
}

fn guarded(metrics: &LinkMetrics, what: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        metrics.listener_panics.fetch_add(1, Ordering::Relaxed);
        warn!("A {} panicked; continuing", what);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use usbgps_protocol::{Fix, FrameDecoder, ProtocolMode};

    #[derive(Default)]
    struct RecordingSink {
        fixes: Mutex<Vec<Fix>>,
    }

    impl LocationSink for RecordingSink {
        fn report_fix(&self, fix: &Fix) {
            self.fixes.lock().push(fix.clone());
        }
        fn out_of_service(&self) {}
    }

    #[derive(Default)]
    struct RecordingClock {
        times: Mutex<Vec<u64>>,
    }

    impl ClockSetter for RecordingClock {
        fn set_time(&self, timestamp_ms: u64) {
            self.times.lock().push(timestamp_ms);
        }
    }

    fn frames(text: &str) -> Vec<Frame> {
        FrameDecoder::new(ProtocolMode::Nmea).feed(text.as_bytes())
    }

    const EPOCH_1: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n\
                           $GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n";
    const EPOCH_2: &str = "$GPGGA,123520,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*4D\r\n\
                           $GPRMC,123520,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*60\r\n";

    #[test]
    fn test_registry_add_remove_clear() {
        let registry = ListenerRegistry::new();
        let a = registry.add_frame_listener(Arc::new(|_: &Frame| {}));
        let b = registry.add_event_listener(Arc::new(|_: &LinkEvent| {}));
        assert_ne!(a, b);
        assert_eq!(registry.frame_listener_count(), 1);
        assert_eq!(registry.event_listener_count(), 1);
        assert!(!registry.remove_frame_listener(b));
        assert!(registry.remove_frame_listener(a));
        assert!(!registry.remove_frame_listener(a));
        registry.clear();
        assert_eq!(registry.event_listener_count(), 0);
    }

    #[test]
    fn test_dispatch_order_and_fix_assembly() {
        let registry = Arc::new(ListenerRegistry::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            registry.add_frame_listener(Arc::new(move |frame: &Frame| {
                seen.lock().push(frame.as_nmea().map(|s| s.sentence_type().to_string()));
            }));
        }
        let location = Arc::new(RecordingSink::default());
        let clock = Arc::new(RecordingClock::default());
        let dispatcher = EventDispatcher::spawn(DispatchContext {
            registry: registry.clone(),
            location: location.clone(),
            diagnostics: Arc::new(crate::sinks::TracingDiagnostics),
            clock: Some(clock.clone()),
            metrics: Arc::new(LinkMetrics::new()),
        })
        .unwrap();

        let tx = dispatcher.sender();
        for frame in frames(EPOCH_1) {
            tx.send(Dispatch::Frame(frame)).unwrap();
        }
        // 同一连接的第二个定位结果不再校准时钟
        for frame in frames(EPOCH_2) {
            tx.send(Dispatch::Frame(frame)).unwrap();
        }
        tx.send(Dispatch::ConnectionOpened).unwrap();
        for frame in frames(EPOCH_1) {
            tx.send(Dispatch::Frame(frame)).unwrap();
        }
        dispatcher.shutdown(Duration::from_secs(2));

        let seen = seen.lock();
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[0].as_deref(), Some("GGA"));
        assert_eq!(seen[1].as_deref(), Some("RMC"));
        assert_eq!(location.fixes.lock().len(), 3);
        assert_eq!(clock.times.lock().len(), 2);
    }

    #[test]
    fn test_panicking_listener_isolated() {
        let registry = Arc::new(ListenerRegistry::new());
        registry.add_event_listener(Arc::new(|_: &LinkEvent| panic!("listener bug")));
        let delivered = Arc::new(AtomicU64::new(0));
        {
            let delivered = delivered.clone();
            registry.add_event_listener(Arc::new(move |_: &LinkEvent| {
                delivered.fetch_add(1, Ordering::SeqCst);
            }));
        }
        let metrics = Arc::new(LinkMetrics::new());
        let dispatcher = EventDispatcher::spawn(DispatchContext {
            registry,
            location: Arc::new(RecordingSink::default()),
            diagnostics: Arc::new(crate::sinks::TracingDiagnostics),
            clock: None,
            metrics: metrics.clone(),
        })
        .unwrap();

        let tx = dispatcher.sender();
        tx.send(Dispatch::Event(LinkEvent::ProblemCleared)).unwrap();
        tx.send(Dispatch::Event(LinkEvent::SpeedSelected(9600))).unwrap();
        dispatcher.shutdown(Duration::from_secs(2));

        assert_eq!(delivered.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.snapshot().listener_panics, 2);
    }

    /// 记录 problem_cleared 在哪个线程上被调用
    #[derive(Default)]
    struct ThreadRecordingDiagnostics {
        cleared_on: Mutex<Vec<Option<String>>>,
    }

    impl DiagnosticsSink for ThreadRecordingDiagnostics {
        fn retrying(&self, _: crate::DisableReason, _: u32) {}

        fn problem_cleared(&self) {
            std::thread::sleep(Duration::from_millis(50));
            self.cleared_on.lock().push(std::thread::current().name().map(str::to_string));
        }

        fn fatal_stop(&self, _: crate::DisableReason) {}
    }

    #[test]
    fn test_problem_cleared_runs_on_dispatch_thread() {
        let registry = Arc::new(ListenerRegistry::new());
        let diagnostics = Arc::new(ThreadRecordingDiagnostics::default());
        let dispatcher = EventDispatcher::spawn(DispatchContext {
            registry,
            location: Arc::new(RecordingSink::default()),
            diagnostics: diagnostics.clone(),
            clock: None,
            metrics: Arc::new(LinkMetrics::new()),
        })
        .unwrap();

        // 投递方不等待诊断回调
        let started = std::time::Instant::now();
        let tx = dispatcher.sender();
        tx.send(Dispatch::Event(LinkEvent::ProblemCleared)).unwrap();
        tx.send(Dispatch::Event(LinkEvent::SpeedSelected(9600))).unwrap();
        assert!(started.elapsed() < Duration::from_millis(50));
        dispatcher.shutdown(Duration::from_secs(2));

        let cleared_on = diagnostics.cleared_on.lock();
        assert_eq!(*cleared_on, vec![Some("usbgps-dispatch".to_string())]);
    }
}
