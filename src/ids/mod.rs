//! Scholarly identifier extraction and remote crosswalks.

pub mod extractor;
pub mod resolver;

pub use extractor::{IdentifierExtractor, PaperIdentifier};
pub use resolver::{IdResolver, PmcidResolution};

use md5::{Digest, Md5};

/// Lowercase hex MD5 digest, used for canonical identity hashes.
pub(crate) fn md5_hex(input: &str) -> String {
    let digest = Md5::digest(input.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_hex_matches_known_vector() {
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }
}
