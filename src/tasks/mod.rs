pub mod retention;
pub mod sync;
