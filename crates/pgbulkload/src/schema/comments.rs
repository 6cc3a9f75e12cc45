//! Table and column comments.
//!
//! Comment bodies come from the source and may contain anything, so they
//! are dollar-quoted with a random 11-character tag of the form
//! `[A-Z]{5}_[A-Z]{5}`; a tag colliding with the body is re-rolled.

use rand::Rng;
use tracing::warn;

use crate::core::schema::{quote_ident, TableSpec};
use crate::error::Result;
use crate::pg::session::Session;
use crate::stats::Stats;

/// Stats label for comment application.
pub const COMMENTS_LABEL: &str = "Comments";

/// A random `[A-Z]{5}_[A-Z]{5}` dollar-quote tag.
pub fn random_tag() -> String {
    let mut rng = rand::rng();
    let mut tag = String::with_capacity(11);
    for i in 0..11 {
        if i == 5 {
            tag.push('_');
        } else {
            tag.push((b'A' + rng.random_range(0..26)) as char);
        }
    }
    tag
}

/// Dollar-quote `body` with a tag that does not occur inside it.
pub fn dollar_quote(body: &str) -> String {
    loop {
        let tag = random_tag();
        if !body.contains(&tag) {
            return format!("${tag}${body}${tag}$", tag = tag, body = body);
        }
    }
}

/// Apply table and column comments sequentially, timed under
/// [`COMMENTS_LABEL`]. Each statement runs in its own implicit
/// transaction; a failure is recorded and the rest still apply.
pub async fn apply_comments(
    session: &Session,
    tables: &[TableSpec],
    stats: &Stats,
) -> Result<()> {
    for table in tables {
        if let Some(comment) = &table.comment {
            let sql = format!(
                "COMMENT ON TABLE {} IS {}",
                table.quoted_name(),
                dollar_quote(comment)
            );
            if let Err(e) = session.exec_timed(COMMENTS_LABEL, &sql, stats).await {
                warn!("comment on {} failed: {}", table.qualified_name(), e);
            }
        }
        for column in &table.columns {
            if let Some(comment) = &column.comment {
                let sql = format!(
                    "COMMENT ON COLUMN {}.{} IS {}",
                    table.quoted_name(),
                    quote_ident(&column.name),
                    dollar_quote(comment)
                );
                if let Err(e) = session.exec_timed(COMMENTS_LABEL, &sql, stats).await {
                    warn!(
                        "comment on {}.{} failed: {}",
                        table.qualified_name(),
                        column.name,
                        e
                    );
                }
            }
        }
    }
    Ok(())
}
