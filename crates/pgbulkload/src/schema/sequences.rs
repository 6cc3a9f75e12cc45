//! Sequence reset after data load.
//!
//! One server-side procedure walks every `nextval`-defaulted column of the
//! loaded tables and issues `setval(seq, greatest(max(col), 1))`. The
//! procedure reports how many sequences it touched via `pg_notify` on the
//! `"seqs"` channel; the caller listens and records the count. When no
//! sequence is touched no notification is sent, and the listener records a
//! silent zero rather than blocking.

use std::time::Duration;

use tracing::{debug, info};

use crate::core::schema::TableSpec;
use crate::error::Result;
use crate::pg::session::Session;
use crate::stats::Stats;

/// Stats label for the sequence reset.
pub const SEQUENCES_LABEL: &str = "Reset Sequences";

/// Notification channel used by the server-side procedure.
pub const SEQS_CHANNEL: &str = "seqs";

/// How long to wait for the self-notification before assuming zero.
const NOTIFY_WAIT: Duration = Duration::from_secs(2);

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// The `DO $$ … $$` block resetting sequences for the given tables.
pub fn reset_sql(schema: &str, tables: &[TableSpec]) -> String {
    let names: Vec<String> = tables
        .iter()
        .map(|t| quote_literal(&t.name))
        .collect();
    format!(
        r#"DO $seqs$
DECLARE
  n integer := 0;
  r record;
BEGIN
  FOR r IN
    SELECT format('%I.%I', n.nspname, c.relname) AS qualified,
           a.attname AS colname,
           pg_get_serial_sequence(format('%I.%I', n.nspname, c.relname), a.attname) AS seq
      FROM pg_class c
      JOIN pg_namespace n ON n.oid = c.relnamespace
      JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum > 0
      JOIN pg_attrdef d ON d.adrelid = c.oid AND d.adnum = a.attnum
     WHERE n.nspname = {schema}
       AND c.relname = ANY (ARRAY[{names}])
       AND pg_get_expr(d.adbin, d.adrelid) LIKE 'nextval(%'
  LOOP
    EXECUTE format('SELECT setval(%L, greatest((SELECT max(%I) FROM %s), 1))',
                   r.seq, r.colname, r.qualified);
    n := n + 1;
  END LOOP;
  PERFORM pg_notify('{channel}', n::text);
END;
$seqs$"#,
        schema = quote_literal(schema),
        names = names.join(", "),
        channel = SEQS_CHANNEL,
    )
}

/// Run the reset on `session` and record the touched-sequence count under
/// [`SEQUENCES_LABEL`].
pub async fn reset_sequences(
    session: &mut Session,
    schema: &str,
    tables: &[TableSpec],
    stats: &Stats,
) -> Result<()> {
    if tables.is_empty() {
        return Ok(());
    }

    session.listen(SEQS_CHANNEL).await?;
    let sql = reset_sql(schema, tables);
    {
        let _timer = stats.scoped_timer(SEQUENCES_LABEL);
        session.batch_execute(&sql).await?;
    }

    // The notification from our own session arrives right after the DO
    // block commits; poll briefly and settle for zero if none shows up.
    let mut touched: i64 = 0;
    let deadline = tokio::time::Instant::now() + NOTIFY_WAIT;
    loop {
        let payloads = session.drain_notifications(SEQS_CHANNEL);
        if let Some(last) = payloads.last() {
            touched = last.parse().unwrap_or(0);
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            debug!("no sequence-reset notification; recording zero");
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    stats.set_rows_from_result(SEQUENCES_LABEL, touched);
    info!("reset {} sequences", touched);
    Ok(())
}
