//! Japanese sentence segmentation.
//!
//! Splits article text into an ordered list of sentence units on 。！？
//! boundaries, with paragraph-break markers between paragraphs. Pure and
//! deterministic: the same input always yields the same units.

/// One orderable piece of an article: a sentence, or a paragraph break.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceUnit {
    /// Position in the emitted sequence, breaks included.
    pub index: usize,
    pub text: String,
    pub is_paragraph_break: bool,
}

impl SentenceUnit {
    fn sentence(index: usize, text: String) -> Self {
        Self {
            index,
            text,
            is_paragraph_break: false,
        }
    }

    fn paragraph_break(index: usize) -> Self {
        Self {
            index,
            text: String::new(),
            is_paragraph_break: true,
        }
    }
}

/// Sentence-terminal punctuation: ideographic full stop, full-width ! and ?.
const TERMINALS: [char; 3] = ['。', '！', '？'];

fn is_terminal(c: char) -> bool {
    TERMINALS.contains(&c)
}

/// Split text into sentence units with paragraph-break markers.
///
/// Paragraphs are runs of non-empty lines; whitespace-only paragraphs are
/// dropped without leaving a break behind. Within a paragraph, each terminal
/// mark ends a sentence and stays attached to it; a run of terminal marks
/// stays inside one sentence. A trailing fragment with no terminal mark is
/// still a sentence. One break marker follows every paragraph but the last.
pub fn segment(text: &str) -> Vec<SentenceUnit> {
    let paragraphs: Vec<&str> = text
        .split('\n')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let mut units = Vec::new();
    for (pi, paragraph) in paragraphs.iter().enumerate() {
        for sentence in split_paragraph(paragraph) {
            units.push(SentenceUnit::sentence(units.len(), sentence));
        }
        if pi + 1 < paragraphs.len() {
            units.push(SentenceUnit::paragraph_break(units.len()));
        }
    }
    units
}

/// Split one paragraph into trimmed, non-empty sentences.
fn split_paragraph(paragraph: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = paragraph.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        // A terminal mark closes the sentence once the run of marks ends.
        if is_terminal(c) && !chars.peek().copied().map_or(false, is_terminal) {
            push_trimmed(&mut sentences, &mut current);
        }
    }
    push_trimmed(&mut sentences, &mut current);

    sentences
}

fn push_trimmed(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(units: &[SentenceUnit]) -> Vec<&str> {
        units.iter().map(|u| u.text.as_str()).collect()
    }

    #[test]
    fn splits_sentences_and_paragraphs() {
        let units = segment("今日は晴れです。散歩に行きました！\n明日は雨かな？");

        assert_eq!(units.len(), 4);
        assert_eq!(units[0].text, "今日は晴れです。");
        assert_eq!(units[1].text, "散歩に行きました！");
        assert!(units[2].is_paragraph_break);
        assert_eq!(units[3].text, "明日は雨かな？");
        // Indices are positional over the whole sequence, breaks included.
        for (i, unit) in units.iter().enumerate() {
            assert_eq!(unit.index, i);
        }
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(segment("").is_empty());
        assert!(segment("   \n\n  \t\n").is_empty());
    }

    #[test]
    fn paragraph_without_terminal_is_one_sentence() {
        let units = segment("句点のない段落");
        assert_eq!(texts(&units), vec!["句点のない段落"]);
    }

    #[test]
    fn trailing_fragment_is_kept() {
        let units = segment("最初の文。そして続き");
        assert_eq!(texts(&units), vec!["最初の文。", "そして続き"]);
    }

    #[test]
    fn consecutive_terminals_stay_in_one_sentence() {
        let units = segment("ええっ！？本当に？？");
        assert_eq!(texts(&units), vec!["ええっ！？", "本当に？？"]);
    }

    #[test]
    fn blank_paragraphs_leave_no_break_behind() {
        let units = segment("一つ目。\n\n\n二つ目。");
        assert_eq!(units.len(), 3);
        assert!(units[1].is_paragraph_break);
        assert_eq!(units[2].text, "二つ目。");
    }

    #[test]
    fn no_break_after_last_paragraph() {
        let units = segment("段落一。\n段落二。");
        assert!(!units.last().unwrap().is_paragraph_break);
    }

    #[test]
    fn never_emits_empty_sentences() {
        let inputs = [
            "。！？",
            "  。  \n  ！  ",
            "文。 。もう一つ。",
            "a。\n\nb！\n \nc",
        ];
        for input in inputs {
            for unit in segment(input) {
                if !unit.is_paragraph_break {
                    assert!(
                        !unit.text.trim().is_empty(),
                        "empty sentence from input {input:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn segment_is_deterministic() {
        let text = "今日は晴れです。散歩に行きました！\n明日は雨かな？";
        assert_eq!(segment(text), segment(text));
    }
}
