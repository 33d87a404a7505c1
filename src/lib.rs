pub mod analysis;
pub mod archive;
pub mod chunking;
pub mod config;
pub mod context;
pub mod database;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod gemini;
pub mod invoice;
pub mod llm;
pub mod models;
pub mod policy;
pub mod prompts;
pub mod rag;
pub mod retry;
pub mod search;
pub mod server;
