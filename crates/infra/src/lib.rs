pub mod llm;
pub mod platform;
pub mod store;
