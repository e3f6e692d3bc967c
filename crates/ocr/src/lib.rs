pub mod codes;
pub mod extractor;

pub use codes::reference_candidates;
pub use extractor::{ExtractError, HttpExtractor, MockExtractor, TextExtractor, TextFragment};
