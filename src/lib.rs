//! HTTP gateway that forwards a chart image and a prompt to a vision-language
//! model served by Ollama, and returns the model's answer.

pub mod config;
pub mod ollama;
pub mod server;
