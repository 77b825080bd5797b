//! Record sources

mod csv;
mod json;
mod sql;

pub use self::csv::{parse_delimiter, CsvSource};
pub use self::json::{JsonArrayReader, JsonSource, DEFAULT_KEYS_SAMPLE_ROWS};
pub use self::sql::SqlSource;
