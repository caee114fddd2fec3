pub mod operator;
pub mod osquery;
