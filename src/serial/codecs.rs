/// Splits byte streams into lines of text.
pub mod lines;
