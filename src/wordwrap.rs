//! Word wrapping for long IRC reply lines.

/// Wrap `words` into lines of at most `max_len` bytes, joining words with
/// single spaces. A single word longer than `max_len` is first emitted whole,
/// then truncated to `max_len` bytes in a final pass. Multi-word lines are
/// never split mid-word.
pub fn word_wrap(words: &[&str], max_len: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut cur_len = 0usize;
    let mut cur: Vec<&str> = Vec::new();
    for word in words {
        // cur_len + cur.len() + word.len() is the length of the current line
        // including separating spaces
        if cur_len + cur.len() + word.len() > max_len {
            if !cur.is_empty() {
                lines.push(cur.join(" "));
            }
            cur = vec![word];
            cur_len = word.len();
        } else {
            cur.push(word);
            cur_len += word.len();
        }
    }
    if !cur.is_empty() {
        lines.push(cur.join(" "));
    }
    for line in &mut lines {
        if line.len() > max_len {
            *line = truncate_bytes(line, max_len);
        }
    }
    lines
}

/// Truncate to at most `max_len` bytes without splitting a UTF-8 sequence.
fn truncate_bytes(s: &str, max_len: usize) -> String {
    let mut end = max_len.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOX: &str = "The quick brown fox jumps over the lazy dog";

    fn fox_words() -> Vec<&'static str> {
        FOX.split_whitespace().collect()
    }

    #[test]
    fn wrap_multi_line() {
        let wrapped = word_wrap(&fox_words(), 10);
        assert_eq!(
            wrapped,
            vec!["The quick", "brown fox", "jumps over", "the lazy", "dog"]
        );
    }

    #[test]
    fn wrap_single_line() {
        let wrapped = word_wrap(&fox_words(), 100);
        assert_eq!(wrapped, vec![FOX]);
    }

    #[test]
    fn wrap_truncates_long_words() {
        let wrapped = word_wrap(&fox_words(), 3);
        assert_eq!(
            wrapped,
            vec!["The", "qui", "bro", "fox", "jum", "ove", "the", "laz", "dog"]
        );
    }

    #[test]
    fn wrap_empty_input() {
        assert!(word_wrap(&[], 10).is_empty());
    }

    #[test]
    fn every_line_fits() {
        let wrapped = word_wrap(&fox_words(), 7);
        for line in &wrapped {
            assert!(line.len() <= 7, "line too long: {line:?}");
        }
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let wrapped = word_wrap(&["héllo"], 2);
        assert_eq!(wrapped, vec!["h"]);
    }
}
