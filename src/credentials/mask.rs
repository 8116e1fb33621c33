/// Masks a token for log output, keeping fewer characters the shorter it is.
///
/// ```
/// use vkinder_vault::credentials::mask_token;
///
/// assert_eq!(mask_token("vk1.a.abcdefghijklmnop"), "vk1.a.ab***lmnop");
/// assert_eq!(mask_token("abc"), "***");
/// ```
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let len = chars.len();

    let (head, tail) = match len {
        0 => return "(empty)".to_string(),
        16.. => (8, 5),
        13..=15 => (6, 4),
        11..=12 => (4, 4),
        9..=10 => (3, 3),
        8 => (2, 3),
        5..=7 => (1, 1),
        4 => (1, 0),
        _ => (0, 0),
    };

    let head: String = chars[..head].iter().collect();
    let tail: String = chars[len - tail..].iter().collect();
    format!("{}***{}", head, tail)
}
