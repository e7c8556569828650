pub mod drawing;
pub mod geometry;
pub mod variables;

pub fn version() -> &'static str {
    "0.1.0"
}
