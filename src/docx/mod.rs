pub mod extract;
pub mod generate;
pub mod package;
pub mod render;
pub mod xml;
