//! 测试用的脚本化连接器
//!
//! 不连接真实数据库：记录打开/关闭/提交/回滚次数与并发执行数，
//! 语句包含 `BLOCK` 时等待 `gate`，包含 `FAIL` 时返回执行错误，
//! 其余语句交给 responder 生成结果。

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::database::{ConnectionSettings, Connector, DatabaseError, Row, SqlConnection, SqlValue};

pub(crate) type Responder =
    dyn Fn(&str, &[SqlValue]) -> Result<Vec<Row>, DatabaseError> + Send + Sync;

#[derive(Default)]
pub(crate) struct ConnectorStats {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl ConnectorStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub(crate) struct ScriptedConnector {
    pub stats: Arc<ConnectorStats>,
    pub gate: Arc<Notify>,
    /// 已执行（且成功）的语句，按完成顺序
    pub executed: Arc<Mutex<Vec<(String, Vec<SqlValue>)>>>,
    next_id: Arc<AtomicI64>,
    responder: Arc<Responder>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::with_responder(|_, _| Ok(Vec::new()))
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str, &[SqlValue]) -> Result<Vec<Row>, DatabaseError> + Send + Sync + 'static,
    {
        Self {
            stats: Arc::new(ConnectorStats::default()),
            gate: Arc::new(Notify::new()),
            executed: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicI64::new(1)),
            responder: Arc::new(responder),
        }
    }

    pub fn executed_statements(&self) -> Vec<String> {
        self.executed.lock().iter().map(|(s, _)| s.clone()).collect()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        _settings: &ConnectionSettings,
    ) -> Result<Box<dyn SqlConnection>, DatabaseError> {
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            stats: Arc::clone(&self.stats),
            gate: Arc::clone(&self.gate),
            executed: Arc::clone(&self.executed),
            next_id: Arc::clone(&self.next_id),
            responder: Arc::clone(&self.responder),
        }))
    }
}

struct ScriptedConnection {
    stats: Arc<ConnectorStats>,
    gate: Arc<Notify>,
    executed: Arc<Mutex<Vec<(String, Vec<SqlValue>)>>>,
    next_id: Arc<AtomicI64>,
    responder: Arc<Responder>,
}

impl ScriptedConnection {
    async fn run(&mut self, statement: &str, params: &[SqlValue]) -> Result<Vec<Row>, DatabaseError> {
        let now = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_active.fetch_max(now, Ordering::SeqCst);

        if statement.contains("BLOCK") {
            self.gate.notified().await;
        }
        tokio::task::yield_now().await;

        let result = if statement.contains("FAIL") {
            Err(DatabaseError::Execution(format!("scripted failure: {statement}")))
        } else {
            (self.responder)(statement, params)
        };
        if result.is_ok() {
            self.executed
                .lock()
                .push((statement.to_string(), params.to_vec()));
        }

        self.stats.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl SqlConnection for ScriptedConnection {
    async fn begin(&mut self) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn fetch_all(
        &mut self,
        statement: &str,
        params: &[SqlValue],
    ) -> Result<Vec<Row>, DatabaseError> {
        self.run(statement, params).await
    }

    async fn insert(&mut self, statement: &str, params: &[SqlValue]) -> Result<i64, DatabaseError> {
        let rows = self.run(statement, params).await?;
        match rows.first().and_then(|row| row.get("id")) {
            Some(SqlValue::Int(id)) => Ok(*id),
            _ => Ok(self.next_id.fetch_add(1, Ordering::SeqCst)),
        }
    }

    async fn commit(&mut self) -> Result<(), DatabaseError> {
        self.stats.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DatabaseError> {
        self.stats.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), DatabaseError> {
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
