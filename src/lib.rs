// Library exports for InnerLight - real-time emotion detection for chat

pub mod camera;
pub mod chat;
pub mod config;
pub mod context;
pub mod emotion;
pub mod error;
pub mod face;
pub mod models;
pub mod overlay;
pub mod pipeline;
pub mod region;
pub mod smoother;
#[cfg(feature = "gui")]
pub mod ui;
