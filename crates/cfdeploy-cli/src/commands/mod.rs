pub mod plan;
pub mod state;
pub mod validate;
