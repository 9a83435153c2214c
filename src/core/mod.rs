pub mod config;
pub mod coordinator;
pub mod event_loop;
pub mod loop_state;
pub mod renderer;
pub mod sink;
pub mod source_manager;
pub mod stats;
pub mod submitter;
pub mod transcript;
pub mod variant_controller;
