pub const CREATE_RECORDS: &str = r#"
CREATE TABLE IF NOT EXISTS records (
  namespace    TEXT NOT NULL,
  record_id    TEXT NOT NULL,
  payload      TEXT NOT NULL,
  updated_at   INTEGER NOT NULL,
  PRIMARY KEY (namespace, record_id)
);
"#;

pub const INDEX_RECORDS_UPDATED_AT: &str =
    "CREATE INDEX IF NOT EXISTS idx_records_updated_at ON records(namespace, updated_at);";

pub fn schema_statements() -> Vec<&'static str> {
    vec![CREATE_RECORDS, INDEX_RECORDS_UPDATED_AT]
}
