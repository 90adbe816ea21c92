pub mod chunked;
pub mod factory;
pub mod gemini;
pub mod simulated;
