//! 连接槽位（Connection Slot）
//!
//! 每个逻辑数据库名对应一个槽位：
//! - 任一时刻最多一个持有者（持有者才允许打开连接）
//! - 等待者按到达顺序排队（FIFO），释放时直接把槽位交给队首等待者
//! - 等待可设上限，超时的票据会从队列中撤回，不影响其余等待者的顺序
//!
//! 交接在锁内完成，所以"队首 + 空闲"的判断与出队是原子的，
//! 不存在两个调用方同时认为自己持有槽位的窗口。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use super::database::DatabaseError;
use super::metrics;

struct Waiter {
    ticket: u64,
    tx: oneshot::Sender<()>,
}

struct SlotState {
    /// 槽位是否已被持有
    busy: bool,
    /// 等待队列（按到达顺序）
    waiters: VecDeque<Waiter>,
    next_ticket: u64,
}

/// 单个数据库名的槽位
pub struct ConnectionSlot {
    db_name: String,
    state: Mutex<SlotState>,
}

impl ConnectionSlot {
    pub fn new(db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            state: Mutex::new(SlotState {
                busy: false,
                waiters: VecDeque::new(),
                next_ticket: 0,
            }),
        }
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// 当前排队中的等待者数量（不含持有者）
    pub fn queue_len(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// 槽位是否被持有
    pub fn is_busy(&self) -> bool {
        self.state.lock().busy
    }

    /// 获取槽位
    ///
    /// `timeout` 为 `None` 时无限等待。返回的 [`SlotPermit`] 在 drop 时释放槽位，
    /// 因此所有退出路径（包括 panic 和 future 被取消）都会释放。
    pub async fn acquire(
        self: &Arc<Self>,
        timeout: Option<Duration>,
    ) -> Result<SlotPermit, DatabaseError> {
        let started = Instant::now();

        let (ticket, rx) = {
            let mut state = self.state.lock();
            let ticket = state.next_ticket;
            state.next_ticket += 1;

            if !state.busy {
                // 空闲时队列必然为空（释放时总是先交接给队首）
                debug_assert!(state.waiters.is_empty());
                state.busy = true;
                metrics::record_slot_wait(&self.db_name, Duration::ZERO);
                return Ok(SlotPermit::new(Arc::clone(self), ticket));
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(Waiter { ticket, tx });
            metrics::record_slot_queue_depth(&self.db_name, state.waiters.len());
            (ticket, rx)
        };

        debug!(db = %self.db_name, ticket, "等待连接槽位");

        let mut pending = PendingTicket {
            slot: Arc::clone(self),
            ticket,
            rx,
            armed: true,
        };

        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, &mut pending.rx).await.ok(),
            None => Some((&mut pending.rx).await),
        };
        pending.armed = false;

        match outcome {
            Some(Ok(())) => {
                metrics::record_slot_wait(&self.db_name, started.elapsed());
                Ok(SlotPermit::new(Arc::clone(self), ticket))
            }
            // 发送端在未发送的情况下被丢弃：接收端存活期间不会发生
            Some(Err(_)) => Err(DatabaseError::SlotClosed(self.db_name.clone())),
            None => {
                if self.withdraw(ticket) {
                    Err(DatabaseError::AcquireTimeout {
                        db_name: self.db_name.clone(),
                        waited: started.elapsed(),
                    })
                } else {
                    // 超时与交接同时发生：槽位已经是我们的
                    metrics::record_slot_wait(&self.db_name, started.elapsed());
                    Ok(SlotPermit::new(Arc::clone(self), ticket))
                }
            }
        }
    }

    /// 从队列中撤回票据；返回 false 表示票据已被交接（槽位归调用方）
    fn withdraw(&self, ticket: u64) -> bool {
        let mut state = self.state.lock();
        match state.waiters.iter().position(|w| w.ticket == ticket) {
            Some(pos) => {
                state.waiters.remove(pos);
                metrics::record_slot_queue_depth(&self.db_name, state.waiters.len());
                true
            }
            None => false,
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        Self::hand_off(&self.db_name, &mut state);
    }

    /// 把槽位交给下一个仍在等待的调用方；没有则置为空闲
    fn hand_off(db_name: &str, state: &mut SlotState) {
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.tx.send(()).is_ok() {
                debug!(db = %db_name, ticket = waiter.ticket, "连接槽位已交接");
                metrics::record_slot_queue_depth(db_name, state.waiters.len());
                return;
            }
            // 接收端已不存在（等待方被取消），跳过
        }
        state.busy = false;
        metrics::record_slot_queue_depth(db_name, 0);
    }
}

/// 排队中的票据；等待的 future 被中途丢弃时负责清理
struct PendingTicket {
    slot: Arc<ConnectionSlot>,
    ticket: u64,
    rx: oneshot::Receiver<()>,
    armed: bool,
}

impl Drop for PendingTicket {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // rx 在 drop 体执行完之前仍然存活，所以只要票据已不在队列中，交接一定成功了
        if !self.slot.withdraw(self.ticket) {
            self.slot.release();
        }
    }
}

/// 槽位持有凭证，drop 时释放并交接给下一个等待者
pub struct SlotPermit {
    slot: Arc<ConnectionSlot>,
    ticket: u64,
}

impl SlotPermit {
    fn new(slot: Arc<ConnectionSlot>, ticket: u64) -> Self {
        Self { slot, ticket }
    }

    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.slot.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn wait_for_queue(slot: &ConnectionSlot, len: usize) {
        while slot.queue_len() != len {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_acquire_when_idle() {
        let slot = Arc::new(ConnectionSlot::new("db"));
        assert!(!slot.is_busy());

        let permit = slot.acquire(None).await.unwrap();
        assert!(slot.is_busy());
        assert_eq!(slot.queue_len(), 0);

        drop(permit);
        assert!(!slot.is_busy());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_waiters_are_served_in_arrival_order() {
        let slot = Arc::new(ConnectionSlot::new("db"));
        let order = Arc::new(Mutex::new(Vec::new()));
        let holder = slot.acquire(None).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let waiter = Arc::clone(&slot);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _permit = waiter.acquire(None).await.unwrap();
                order.lock().push(i);
            }));
            // 确保第 i 个等待者已入队，再启动下一个
            wait_for_queue(&slot, i + 1).await;
        }

        drop(holder);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());
        assert!(!slot.is_busy());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_only_one_holder_at_a_time() {
        let slot = Arc::new(ConnectionSlot::new("db"));
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let slot = Arc::clone(&slot);
            let active = Arc::clone(&active);
            let max_active = Arc::clone(&max_active);
            handles.push(tokio::spawn(async move {
                let _permit = slot.acquire(None).await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert!(!slot.is_busy());
    }

    /// 只收集槽位等待直方图的本地 Recorder
    struct SlotWaitRecorder {
        samples: Arc<Mutex<Vec<f64>>>,
    }

    struct Samples(Arc<Mutex<Vec<f64>>>);

    impl ::metrics::HistogramFn for Samples {
        fn record(&self, value: f64) {
            self.0.lock().push(value);
        }
    }

    impl ::metrics::Recorder for SlotWaitRecorder {
        fn describe_counter(&self, _: ::metrics::KeyName, _: Option<::metrics::Unit>, _: ::metrics::SharedString) {}
        fn describe_gauge(&self, _: ::metrics::KeyName, _: Option<::metrics::Unit>, _: ::metrics::SharedString) {}
        fn describe_histogram(&self, _: ::metrics::KeyName, _: Option<::metrics::Unit>, _: ::metrics::SharedString) {}

        fn register_counter(&self, _: &::metrics::Key, _: &::metrics::Metadata<'_>) -> ::metrics::Counter {
            ::metrics::Counter::noop()
        }

        fn register_gauge(&self, _: &::metrics::Key, _: &::metrics::Metadata<'_>) -> ::metrics::Gauge {
            ::metrics::Gauge::noop()
        }

        fn register_histogram(&self, key: &::metrics::Key, _: &::metrics::Metadata<'_>) -> ::metrics::Histogram {
            if key.name() == "guard_db_slot_wait_seconds" {
                ::metrics::Histogram::from_arc(Arc::new(Samples(Arc::clone(&self.samples))))
            } else {
                ::metrics::Histogram::noop()
            }
        }
    }

    #[test]
    fn test_uncontended_acquire_records_zero_wait() {
        let recorder = SlotWaitRecorder {
            samples: Arc::new(Mutex::new(Vec::new())),
        };
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        ::metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let slot = Arc::new(ConnectionSlot::new("db"));
                drop(slot.acquire(None).await.unwrap());
                drop(slot.acquire(None).await.unwrap());
            })
        });

        assert_eq!(*recorder.samples.lock(), vec![0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_timeout_withdraws_ticket() {
        let slot = Arc::new(ConnectionSlot::new("db"));
        let holder = slot.acquire(None).await.unwrap();

        let err = slot
            .acquire(Some(Duration::from_millis(20)))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DatabaseError::AcquireTimeout { .. }));
        assert_eq!(slot.queue_len(), 0);

        drop(holder);
        assert!(!slot.is_busy());
        let _again = slot.acquire(Some(Duration::from_millis(20))).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_waiter_is_skipped() {
        let slot = Arc::new(ConnectionSlot::new("db"));
        let holder = slot.acquire(None).await.unwrap();

        let cancelled = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move {
                let _permit = slot.acquire(None).await;
            })
        };
        wait_for_queue(&slot, 1).await;

        let next = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move { slot.acquire(None).await.map(|p| p.ticket()) })
        };
        wait_for_queue(&slot, 2).await;

        cancelled.abort();
        let _ = cancelled.await;
        assert_eq!(slot.queue_len(), 1);

        drop(holder);
        let ticket = next.await.unwrap().unwrap();
        assert_eq!(ticket, 2);
        assert!(!slot.is_busy());
    }
}
