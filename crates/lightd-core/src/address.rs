//! Transparent address validation.
//!
//! Address-index queries are forwarded to the full node, so the server only
//! checks the textual shape of an address before spending an RPC round trip
//! on it: the prefix `t` followed by exactly 34 ASCII alphanumerics. No
//! checksum or network check is performed here; the node rejects those.

use crate::constants::{TRANSPARENT_ADDRESS_LEN, TRANSPARENT_ADDRESS_PREFIX};

/// Returns `true` if `address` has the shape of a transparent address.
///
/// Surrounding whitespace is not trimmed; `" t1..."` is invalid.
pub fn is_valid(address: &str) -> bool {
    if address.len() != TRANSPARENT_ADDRESS_LEN {
        return false;
    }
    address
        .strip_prefix(TRANSPARENT_ADDRESS_PREFIX)
        .is_some_and(|body| body.bytes().all(|b| b.is_ascii_alphanumeric()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TRANSPARENT_ADDRESS_BODY_LEN;
    use proptest::prelude::*;

    const CANONICAL: &str = "t1234567890123456789012345678901234";

    #[test]
    fn accepts_canonical_address() {
        assert!(is_valid(CANONICAL));
    }

    #[test]
    fn accepts_mixed_case_body() {
        assert!(is_valid("tmXnqKLDLyoxvcQv4HBdWPzhdhsJaRRLDHA"));
    }

    #[test]
    fn rejects_malformed_addresses() {
        let cases = [
            "",
            "a",
            "t123456789012345678901234567890123",
            "t12345678901234567890123456789012345",
            "t123456789012345678901234567890123*",
            "s1234567890123456789012345678901234",
            " t1234567890123456789012345678901234",
            "t1234567890123456789012345678901234 ",
            "\nt1234567890123456789012345678901234",
            "t1234567890123456789012345678901234\n",
        ];
        for (i, case) in cases.iter().enumerate() {
            assert!(!is_valid(case), "case {i} should be rejected: {case:?}");
        }
    }

    #[test]
    fn rejects_multibyte_body_of_right_char_count() {
        // 34 chars but more than 34 bytes.
        let addr = format!("t{}é", "1".repeat(33));
        assert!(!is_valid(&addr));
    }

    #[test]
    fn rejects_multibyte_body_of_right_byte_length() {
        let addr = format!("t{}é", "1".repeat(32));
        assert_eq!(addr.len(), TRANSPARENT_ADDRESS_LEN);
        assert!(!is_valid(&addr));
    }

    proptest! {
        #[test]
        fn any_alphanumeric_body_is_valid(body in "[A-Za-z0-9]{34}") {
            let addr = format!("t{body}");
            prop_assert!(is_valid(&addr));
        }

        #[test]
        fn wrong_body_length_is_invalid(body in "[A-Za-z0-9]{0,60}") {
            prop_assume!(body.len() != TRANSPARENT_ADDRESS_BODY_LEN);
            let addr = format!("t{body}");
            prop_assert!(!is_valid(&addr));
        }

        #[test]
        fn other_prefixes_are_invalid(prefix in "[a-su-zA-Z0-9]", body in "[A-Za-z0-9]{34}") {
            let addr = format!("{prefix}{body}");
            prop_assert!(!is_valid(&addr));
        }
    }
}
