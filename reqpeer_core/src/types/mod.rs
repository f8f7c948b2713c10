pub mod net_error;
pub mod types;
