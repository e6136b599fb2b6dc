// src/tests/mod.rs
//! End-to-end limiter behaviour over the fallback store
