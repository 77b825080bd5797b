//! Batch sinks

mod csv;
mod doris;
mod json;
mod sql;

pub use self::csv::CsvSink;
pub use self::doris::{stream_load_url, DorisSink};
pub use self::json::JsonSink;
pub use self::sql::{insert_statement, SqlSink};
