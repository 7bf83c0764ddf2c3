use crate::error::Result;
use crate::tts::TimedAlignment;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// `(start, end, text)` of one caption cue, in seconds on the final track.
pub type SrtEntry = (f64, f64, String);

/// Lines a single cue may wrap onto.
const MAX_CUE_LINES: usize = 2;

/// Words of one alignment, where a word is a maximal run of non-whitespace characters.
fn timed_words(timed: &TimedAlignment) -> Vec<SrtEntry> {
    let a = &timed.alignment;
    let mut words = Vec::new();
    let mut word = String::new();
    let mut word_start = 0.0;
    let mut word_end = 0.0;

    for (i, c) in a.characters.iter().enumerate() {
        if c.is_whitespace() {
            if !word.is_empty() {
                words.push((timed.offset + word_start, timed.offset + word_end, word.clone()));
                word.clear();
            }
            continue;
        }
        if word.is_empty() {
            word_start = a.start_times[i];
        }
        word.push(*c);
        word_end = a.end_times[i].max(word_start);
    }
    if !word.is_empty() {
        words.push((timed.offset + word_start, timed.offset + word_end, word));
    }
    words
}

/// Caption cues from alignments. Consecutive words share a cue while it still
/// fits on `MAX_CUE_LINES` lines of `max_line_chars`; cues never span two alignments.
pub fn build_srt_entries(alignments: &[TimedAlignment], max_line_chars: usize) -> Vec<SrtEntry> {
    let budget = max_line_chars.max(1) * MAX_CUE_LINES;
    let mut entries = Vec::new();
    for timed in alignments {
        let mut cue: Option<SrtEntry> = None;
        for (start, end, word) in timed_words(timed) {
            let fits = cue.as_ref().is_some_and(|(_, _, text)| {
                text.chars().count() + 1 + word.chars().count() <= budget
            });
            if fits {
                if let Some((_, cue_end, text)) = cue.as_mut() {
                    text.push(' ');
                    text.push_str(&word);
                    *cue_end = end;
                }
            } else if let Some(done) = cue.replace((start, end, word)) {
                entries.push(done);
            }
        }
        entries.extend(cue);
    }
    entries
}

pub fn write_srt(path: &Path, entries: &[SrtEntry], max_line_chars: usize) -> Result<()> {
    let mut f = File::create(path)?;
    for (i, (start, end, text)) in entries.iter().enumerate() {
        writeln!(f, "{}", i + 1)?;
        writeln!(f, "{} --> {}", format_srt_time(*start), format_srt_time(*end))?;
        for line in wrap_text(text, max_line_chars) {
            writeln!(f, "{}", line)?;
        }
        writeln!(f)?;
    }
    Ok(())
}

fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_sec = total_ms / 1000;
    let s = total_sec % 60;
    let total_min = total_sec / 60;
    let m = total_min % 60;
    let h = total_min / 60;
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}

fn wrap_text(s: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in s.split_whitespace() {
        if current.chars().count() + word.chars().count() + 1 > width && !current.is_empty() {
            lines.push(current.clone());
            current.clear();
            current.push_str(word);
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::CharacterAlignment;

    fn timed(text: &str, offset: f64) -> TimedAlignment {
        let n = text.chars().count();
        TimedAlignment {
            offset,
            alignment: CharacterAlignment::new(
                text.chars().collect(),
                (0..n).map(|i| i as f64 * 0.1).collect(),
                (0..n).map(|i| (i + 1) as f64 * 0.1).collect(),
            )
            .unwrap(),
        }
    }

    #[test]
    fn test_narrow_cues_hold_one_word_each() {
        let entries = build_srt_entries(&[timed("Hi you", 0.0), timed("Bye", 2.0)], 2);
        let words: Vec<&str> = entries.iter().map(|e| e.2.as_str()).collect();
        assert_eq!(words, vec!["Hi", "you", "Bye"]);

        let (start, end, _) = &entries[1];
        assert!((start - 0.3).abs() < 1e-9);
        assert!((end - 0.6).abs() < 1e-9);

        let (start, end, _) = &entries[2];
        assert!((start - 2.0).abs() < 1e-9);
        assert!((end - 2.3).abs() < 1e-9);
    }

    #[test]
    fn test_words_group_up_to_line_budget() {
        let entries = build_srt_entries(&[timed("one two three four", 0.0), timed("five", 3.0)], 5);
        let texts: Vec<&str> = entries.iter().map(|e| e.2.as_str()).collect();
        // Budget is two lines of five characters; chunks are never merged.
        assert_eq!(texts, vec!["one two", "three four", "five"]);

        let (start, end, _) = &entries[1];
        assert!((start - 0.8).abs() < 1e-9);
        assert!((end - 1.8).abs() < 1e-9);
    }

    #[test]
    fn test_grouped_cue_wraps_at_line_width() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captions.srt");
        let entries = build_srt_entries(&[timed("one two", 0.0)], 5);
        write_srt(&path, &entries, 5).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text, "1\n00:00:00,000 --> 00:00:00,700\none\ntwo\n\n");
    }

    #[test]
    fn test_format_srt_time() {
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
        assert_eq!(format_srt_time(3723.4567), "01:02:03,457");
    }

    #[test]
    fn test_write_srt_numbers_cues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captions.srt");
        write_srt(&path, &[(0.0, 0.5, "Hello".to_string())], 42).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text, "1\n00:00:00,000 --> 00:00:00,500\nHello\n\n");
    }

    #[test]
    fn test_wrap_text_respects_width() {
        assert_eq!(wrap_text("aa bb cc", 5), vec!["aa bb", "cc"]);
    }
}
