//! 指标：连接槽位等待、队列深度、安全事件与拦截次数
//!
//! 只使用 `metrics` 门面宏；未安装 Recorder 时调用为空操作，
//! 由嵌入方决定使用哪种导出器。

use std::time::Duration;

/// 指标名称
const HISTOGRAM_SLOT_WAIT: &str = "guard_db_slot_wait_seconds";
const GAUGE_SLOT_QUEUE_DEPTH: &str = "guard_db_slot_queue_depth";
const COUNTER_UNITS_OF_WORK: &str = "guard_db_units_of_work_total";
const COUNTER_ROLLBACKS: &str = "guard_db_rollbacks_total";
const COUNTER_SECURITY_EVENTS: &str = "guard_security_events_total";
const COUNTER_SECURITY_BLOCKS: &str = "guard_security_blocks_total";

/// 记录一次排队等待槽位的耗时
pub fn record_slot_wait(db_name: &str, waited: Duration) {
    metrics::histogram!(HISTOGRAM_SLOT_WAIT, "db" => db_name.to_string())
        .record(waited.as_secs_f64());
}

/// 更新槽位队列深度（Gauge）
pub fn record_slot_queue_depth(db_name: &str, depth: usize) {
    metrics::gauge!(GAUGE_SLOT_QUEUE_DEPTH, "db" => db_name.to_string()).set(depth as f64);
}

/// 记录一次执行单元（outcome: commit / rollback）
pub fn record_unit_of_work(db_name: &str, committed: bool) {
    let outcome = if committed { "commit" } else { "rollback" };
    metrics::counter!(COUNTER_UNITS_OF_WORK, "db" => db_name.to_string(), "outcome" => outcome)
        .increment(1);
    if !committed {
        metrics::counter!(COUNTER_ROLLBACKS, "db" => db_name.to_string()).increment(1);
    }
}

/// 安全事件 +1
pub fn record_security_event(log_type: &'static str) {
    metrics::counter!(COUNTER_SECURITY_EVENTS, "log_type" => log_type).increment(1);
}

/// 拦截次数 +1
pub fn record_security_block(log_type: &'static str) {
    metrics::counter!(COUNTER_SECURITY_BLOCKS, "log_type" => log_type).increment(1);
}
