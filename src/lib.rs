pub mod agent_loop;
pub mod config;
pub mod delivery;
pub mod error;
pub mod gate;
pub mod handoff;
pub mod openai;
pub mod prompting;
pub mod sessions;
pub mod store;
pub mod tools;
pub mod types;
pub mod webhook;
