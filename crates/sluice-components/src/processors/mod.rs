//! Per-record processors

mod convert;
mod filter;
mod mask;
mod rename;
mod select;

pub use convert::{ConvertType, TargetType};
pub use filter::{FilterRows, Operator};
pub use mask::MaskData;
pub use rename::RenameColumn;
pub use select::SelectColumns;
