pub mod credentials;
pub mod error;
pub mod llm;
pub mod modules;
pub mod oauth;
pub mod ranker;
pub mod registry;
pub mod settings;
pub mod storage;
pub mod vault;
pub mod workflow;
