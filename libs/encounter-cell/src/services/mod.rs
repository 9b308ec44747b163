pub mod attachment;
pub mod encounter;
