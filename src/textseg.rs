//! Sentence segmentation for per-unit synthesis
//!
//! Greedy, punctuation-aware splitting tuned for spoken replies: cut eagerly
//! at sentence-ending marks, later at comma-class marks, and force a cut once
//! the buffer runs well past the target length.

/// Sentence-ending punctuation: cut once the buffer reaches half the target
const SENTENCE_MARKS: &str = "。！？!?；;";

/// Comma-class punctuation: cut once the buffer reaches the full target
const COMMA_MARKS: &str = "，,";

/// Split text into sentence-like units of roughly `max_chars` characters
///
/// Lengths are counted in characters, not bytes. A trailing remainder is
/// kept. Empty or whitespace-only input yields no units.
#[must_use]
pub fn split_for_tts(text: &str, max_chars: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    let mut parts = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;
    for ch in text.chars() {
        buf.push(ch);
        buf_chars += 1;
        let cut = (SENTENCE_MARKS.contains(ch) && buf_chars * 2 >= max_chars)
            || (COMMA_MARKS.contains(ch) && buf_chars >= max_chars)
            || buf_chars * 10 >= max_chars * 12;
        if cut {
            push_trimmed(&mut parts, &buf);
            buf.clear();
            buf_chars = 0;
        }
    }
    push_trimmed(&mut parts, &buf);
    parts
}

fn push_trimmed(parts: &mut Vec<String>, buf: &str) {
    let trimmed = buf.trim();
    if !trimmed.is_empty() {
        parts.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_is_one_unit() {
        let units = split_for_tts("  你好，世界。 ", 120);
        assert_eq!(units, vec!["你好，世界。"]);
    }

    #[test]
    fn empty_input_yields_no_units() {
        assert!(split_for_tts("", 120).is_empty());
        assert!(split_for_tts("   ", 120).is_empty());
    }

    #[test]
    fn sentence_mark_cuts_at_half_target() {
        // 6-char target: a sentence mark cuts once the buffer holds >= 3 chars
        let units = split_for_tts("今天天气好。明天也不错。", 6);
        assert_eq!(units, vec!["今天天气好。", "明天也不错。"]);
    }

    #[test]
    fn comma_cuts_only_at_full_target() {
        let text = "一二三，四五六七八，九十";
        let units = split_for_tts(text, 8);
        // first comma arrives at 4 chars (< 8): no cut; second at 9 (>= 8): cut
        assert_eq!(units, vec!["一二三，四五六七八，", "九十"]);
    }

    #[test]
    fn force_cut_past_one_point_two_times_target() {
        let text: String = std::iter::repeat('字').take(30).collect();
        let units = split_for_tts(&text, 10);
        assert!(units.len() > 1);
        assert!(units.iter().all(|u| u.chars().count() <= 12));
    }
}
