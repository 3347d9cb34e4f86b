pub mod request;
pub mod vault;
