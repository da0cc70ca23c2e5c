use super::Summarizer;
use anyhow::bail;
use unicode_segmentation::UnicodeSegmentation;

/// Extractive summarizer keeping the first sentences of an article.
pub struct LeadSentencesSummarizer {
    max_sentences: usize,
}

impl LeadSentencesSummarizer {
    pub fn new(max_sentences: usize) -> Self {
        Self {
            max_sentences: max_sentences.max(1),
        }
    }
}

impl Summarizer for LeadSentencesSummarizer {
    fn summarize(&mut self, text: &str) -> anyhow::Result<String> {
        let sentences: Vec<String> = text
            .unicode_sentences()
            .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|s| !s.is_empty())
            .take(self.max_sentences)
            .collect();

        if sentences.is_empty() {
            bail!("Nothing to summarize");
        }
        Ok(sentences.join(" "))
    }
}
