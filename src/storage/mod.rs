pub mod table;

pub use table::{ColorTable, RowVersion};
