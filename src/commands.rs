pub mod convert;
pub mod evaluate;
