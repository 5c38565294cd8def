//! Display masking for customer details.
//!
//! These are plain string transforms over values that are already plaintext.
//! They never touch the cipher and never change the character count.

fn mask_keep(value: &str, head: usize, tail: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    let n = chars.len();
    if head + tail > n {
        return "*".repeat(n);
    }
    let mut out: String = chars[..head].iter().collect();
    out.push_str(&"*".repeat(n - head - tail));
    out.extend(&chars[n - tail..]);
    out
}

/// Keeps the first two and last two characters of a phone number.
/// Numbers shorter than four characters are fully starred.
pub fn mask_phone(phone: &str) -> String {
    if phone.chars().count() < 4 {
        return "*".repeat(phone.chars().count());
    }
    mask_keep(phone, 2, 2)
}

/// Keeps the first two characters of a name (only the first for names of
/// one or two characters).
pub fn mask_name(name: &str) -> String {
    let n = name.chars().count();
    let head = if n <= 2 { n.min(1) } else { 2 };
    let mut out: String = name.chars().take(head).collect();
    out.push_str(&"*".repeat(n - head));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+71234567890"), "+7********90");
        assert_eq!(mask_phone("1234"), "1234");
        assert_eq!(mask_phone("123"), "***");
        assert_eq!(mask_phone(""), "");
    }

    #[test]
    fn test_mask_name() {
        assert_eq!(mask_name("Анна"), "Ан**");
        assert_eq!(mask_name("Al"), "A*");
        assert_eq!(mask_name("J"), "J");
        assert_eq!(mask_name(""), "");
    }

    proptest! {
        #[test]
        fn prop_masking_preserves_length(value in "\\PC{0,40}") {
            prop_assert_eq!(mask_phone(&value).chars().count(), value.chars().count());
            prop_assert_eq!(mask_name(&value).chars().count(), value.chars().count());
        }

        #[test]
        fn prop_phone_reveals_only_the_edges(phone in "\\+?[0-9]{4,15}") {
            let masked: Vec<char> = mask_phone(&phone).chars().collect();
            let original: Vec<char> = phone.chars().collect();
            let n = original.len();
            prop_assert_eq!(&masked[..2], &original[..2]);
            prop_assert_eq!(&masked[n - 2..], &original[n - 2..]);
            prop_assert!(masked[2..n - 2].iter().all(|&c| c == '*'));
        }
    }
}
