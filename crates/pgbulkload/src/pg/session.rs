//! PostgreSQL session management.
//!
//! A [`Session`] is a single exclusively-owned connection with explicit
//! transaction state. Server notices are logged at WARNING and muffled;
//! notifications (LISTEN/NOTIFY) are buffered for [`Session::drain_notifications`].

use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_postgres::{AsyncMessage, Client, Config as PgConfig, Connection, Notification};
use tracing::{debug, warn};

use crate::config::uri::{ConnectionSpec, PgHost, TlsMode};
use crate::config::PgSetting;
use crate::core::schema::quote_ident;
use crate::error::{LoadError, Result};
use crate::stats::{Field, Stats};

use super::tls::build_connector;

/// Transaction state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    None,
    Open,
    /// A statement inside the transaction failed; only ROLLBACK is allowed.
    Aborted,
}

/// One live PostgreSQL connection.
pub struct Session {
    client: Client,
    conn_task: tokio::task::JoinHandle<()>,
    notifications: mpsc::UnboundedReceiver<Notification>,
    txn: TxnState,
}

impl Session {
    /// Open a session. Resolves TCP vs. local socket from the host form.
    pub async fn open(spec: &ConnectionSpec) -> Result<Self> {
        let mut cfg = PgConfig::new();
        match &spec.host {
            PgHost::Tcp { host, port } => {
                cfg.host(host);
                cfg.port(*port);
            }
            PgHost::Unix(dir) => {
                cfg.host_path(dir);
            }
        }
        cfg.user(&spec.user);
        if let Some(pw) = &spec.password {
            cfg.password(pw);
        }
        cfg.dbname(&spec.dbname);

        let context = match &spec.host {
            PgHost::Tcp { host, port } => format!("{}:{}/{}", host, port, spec.dbname),
            PgHost::Unix(dir) => format!("{}/{}", dir.display(), spec.dbname),
        };

        // Local sockets never speak TLS.
        let tls = match spec.host {
            PgHost::Unix(_) => None,
            PgHost::Tcp { .. } => build_connector(spec.tls)?,
        };

        let (client, conn_task, notifications) = match tls {
            Some(connector) => {
                cfg.ssl_mode(match spec.tls {
                    TlsMode::Require => tokio_postgres::config::SslMode::Require,
                    _ => tokio_postgres::config::SslMode::Prefer,
                });
                let (client, connection) = cfg
                    .connect(connector)
                    .await
                    .map_err(|e| LoadError::connect(&context, e.to_string()))?;
                let (task, rx) = spawn_connection(connection);
                (client, task, rx)
            }
            None => {
                cfg.ssl_mode(tokio_postgres::config::SslMode::Disable);
                let (client, connection) = cfg
                    .connect(tokio_postgres::NoTls)
                    .await
                    .map_err(|e| LoadError::connect(&context, e.to_string()))?;
                let (task, rx) = spawn_connection(connection);
                (client, task, rx)
            }
        };

        debug!("opened session to {}", context);
        Ok(Self {
            client,
            conn_task,
            notifications,
            txn: TxnState::None,
        })
    }

    /// Raw client access for COPY and queries.
    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub fn txn_state(&self) -> TxnState {
        self.txn
    }

    /// Execute statements outside of the tracked transaction protocol.
    pub async fn batch_execute(&self, sql: &str) -> Result<()> {
        self.client.batch_execute(sql).await.map_err(LoadError::from)
    }

    /// Run a parameterized query.
    pub async fn query(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Vec<tokio_postgres::Row>> {
        self.client.query(sql, params).await.map_err(LoadError::from)
    }

    /// Apply session settings in order via `SET [LOCAL] name TO 'value'`.
    pub async fn apply_settings(&self, settings: &[PgSetting], local: bool) -> Result<()> {
        for setting in settings {
            let scope = if local { "LOCAL " } else { "" };
            let sql = format!(
                "SET {}{} TO '{}'",
                scope,
                setting.name,
                setting.value.replace('\'', "''")
            );
            self.batch_execute(&sql).await?;
        }
        Ok(())
    }

    /// BEGIN. Nested transactions are forbidden by contract.
    pub async fn begin(&mut self) -> Result<()> {
        match self.txn {
            TxnState::Open => return Err(LoadError::NestedTxn),
            TxnState::Aborted => {
                return Err(LoadError::database(
                    "session transaction is aborted; roll back first",
                ))
            }
            TxnState::None => {}
        }
        self.client.batch_execute("BEGIN").await?;
        self.txn = TxnState::Open;
        Ok(())
    }

    /// COMMIT the open transaction.
    pub async fn commit(&mut self) -> Result<()> {
        match self.client.batch_execute("COMMIT").await {
            Ok(()) => {
                self.txn = TxnState::None;
                Ok(())
            }
            Err(e) => {
                self.txn = TxnState::Aborted;
                Err(e.into())
            }
        }
    }

    /// ROLLBACK. Valid from both `Open` and `Aborted`.
    pub async fn rollback(&mut self) -> Result<()> {
        let result = self.client.batch_execute("ROLLBACK").await;
        self.txn = TxnState::None;
        result.map_err(LoadError::from)
    }

    /// Mark the open transaction aborted after a failed statement.
    pub fn mark_aborted(&mut self) {
        if self.txn == TxnState::Open {
            self.txn = TxnState::Aborted;
        }
    }

    /// Execute a statement, recording wall-clock time under `label`. On a
    /// database error the label's `errs` is incremented and the statement's
    /// count contribution is not recorded.
    pub async fn exec_timed(&self, label: &str, sql: &str, stats: &Stats) -> Result<u64> {
        let _timer = stats.scoped_timer(label);
        match self.client.execute(sql, &[]).await {
            Ok(n) => {
                stats.incr(label, Field::Rows, n as i64);
                Ok(n)
            }
            Err(e) => {
                stats.incr(label, Field::Errs, 1);
                Err(e.into())
            }
        }
    }

    /// Start listening on a notification channel.
    pub async fn listen(&self, channel: &str) -> Result<()> {
        self.batch_execute(&format!("LISTEN {}", quote_ident(channel)))
            .await
    }

    /// Drain buffered notifications for a channel without blocking.
    pub fn drain_notifications(&mut self, channel: &str) -> Vec<String> {
        let mut payloads = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            if n.channel() == channel {
                payloads.push(n.payload().to_string());
            }
        }
        payloads
    }

    /// Close the session, releasing the connection.
    pub async fn close(self) {
        drop(self.client);
        let _ = self.conn_task.await;
    }
}

fn spawn_connection<S, T>(
    mut connection: Connection<S, T>,
) -> (
    tokio::task::JoinHandle<()>,
    mpsc::UnboundedReceiver<Notification>,
)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        let mut messages = futures::stream::poll_fn(move |cx| connection.poll_message(cx));
        while let Some(message) = messages.next().await {
            match message {
                Ok(AsyncMessage::Notice(notice)) => {
                    warn!("postgres: {}", notice.message());
                }
                Ok(AsyncMessage::Notification(n)) => {
                    let _ = tx.send(n);
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("postgres connection closed: {}", e);
                    break;
                }
            }
        }
    });
    (task, rx)
}

/// Scoped session acquisition: opens a session, applies settings, runs `f`,
/// and releases the session on every exit path.
pub async fn with_session<T, F>(
    spec: &ConnectionSpec,
    settings: &[PgSetting],
    f: F,
) -> Result<T>
where
    F: for<'a> FnOnce(&'a mut Session) -> BoxFuture<'a, Result<T>>,
{
    let mut session = Session::open(spec).await?;
    session.apply_settings(settings, false).await?;
    let result = f(&mut session).await;
    session.close().await;
    result
}

/// Scoped transaction: BEGIN before `f`, COMMIT on normal return, ROLLBACK
/// on any failure. Calling this while a transaction is open fails with
/// [`LoadError::NestedTxn`] before `f` runs.
pub async fn with_transaction<T, F>(session: &mut Session, f: F) -> Result<T>
where
    F: for<'a> FnOnce(&'a mut Session) -> BoxFuture<'a, Result<T>>,
{
    session.begin().await?;
    match f(session).await {
        Ok(value) => {
            session.commit().await?;
            Ok(value)
        }
        Err(e) => {
            session.mark_aborted();
            if let Err(rb) = session.rollback().await {
                warn!("rollback failed: {}", rb);
            }
            Err(e)
        }
    }
}
