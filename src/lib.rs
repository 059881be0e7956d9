//! jimaku - job-oriented subtitle generation
//!
//! Uploaded audio and video files become jobs. Each file is transcribed with
//! whisper-cpp, translated with ollama and written out as an SRT subtitle,
//! with job status and artifacts served over HTTP.

pub mod cli;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod glossary;
pub mod http;
pub mod media;
pub mod notify;
pub mod pipeline;
pub mod registry;
pub mod retrain;
pub mod service;
pub mod storage;
pub mod subtitle;
pub mod transcribe;
pub mod translate;
pub mod worker;
