// src/middleware/tests/mod.rs
