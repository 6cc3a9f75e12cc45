//! COPY text-format framing.
//!
//! Rows travel as tab-separated lines; `\t`, `\n`, `\r` and `\\` are
//! escaped and NULL is `\N`. The column list is explicit and double-quoted.

use bytes::{BufMut, BytesMut};

use crate::core::row::{Batch, Row};
use crate::core::schema::quote_ident;

/// `COPY "schema"."table" ("col", …) FROM STDIN` for the fixed column order.
pub fn copy_statement(quoted_table: &str, columns: &[String]) -> String {
    let col_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    format!(
        "COPY {} ({}) FROM STDIN",
        quoted_table,
        col_list.join(", ")
    )
}

/// Escape one cell for COPY text format.
pub fn escape_copy_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    result
}

/// Append one row as a COPY text line.
pub fn append_row(buf: &mut BytesMut, row: &Row) {
    for (i, cell) in row.cells.iter().enumerate() {
        if i > 0 {
            buf.put_u8(b'\t');
        }
        match cell {
            Some(v) => buf.put_slice(escape_copy_text(v).as_bytes()),
            None => buf.put_slice(b"\\N"),
        }
    }
    buf.put_u8(b'\n');
}

/// Encode a whole batch into one buffer.
pub fn encode_batch(batch: &Batch) -> BytesMut {
    let mut buf = BytesMut::with_capacity(batch.bytes + batch.len() * 2);
    for row in &batch.rows {
        append_row(&mut buf, row);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_for(row: Row) -> String {
        let mut buf = BytesMut::new();
        append_row(&mut buf, &row);
        String::from_utf8(buf.to_vec()).unwrap()
    }

    #[test]
    fn test_escape_copy_text() {
        assert_eq!(escape_copy_text("hello"), "hello");
        assert_eq!(escape_copy_text("tab\there"), "tab\\there");
        assert_eq!(escape_copy_text("new\nline"), "new\\nline");
        assert_eq!(escape_copy_text("cr\rhere"), "cr\\rhere");
        assert_eq!(escape_copy_text("back\\slash"), "back\\\\slash");
    }

    #[test]
    fn test_append_row_null_and_values() {
        let row = Row::new(vec![
            Some("1".to_string()),
            None,
            Some("a\tb".to_string()),
        ]);
        assert_eq!(line_for(row), "1\t\\N\ta\\tb\n");
    }

    #[test]
    fn test_empty_string_is_not_null() {
        let row = Row::new(vec![Some(String::new()), None]);
        assert_eq!(line_for(row), "\t\\N\n");
    }

    #[test]
    fn test_copy_statement_quotes_columns() {
        let sql = copy_statement(
            "\"public\".\"t\"",
            &["id".to_string(), "weird col".to_string()],
        );
        assert_eq!(
            sql,
            "COPY \"public\".\"t\" (\"id\", \"weird col\") FROM STDIN"
        );
    }

    #[test]
    fn test_encode_batch_is_line_per_row() {
        let mut batch = Batch::new(0);
        batch.push(Row::new(vec![Some("a".to_string())]));
        batch.push(Row::new(vec![Some("b".to_string())]));
        let buf = encode_batch(&batch);
        assert_eq!(&buf[..], b"a\nb\n");
    }
}
