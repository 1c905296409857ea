//! Collects the results of one session into a transcript.

use super::messages::{SpeakerLabel, TranscriptionResult};

/// Results merged by their session-wide `result_index`.
///
/// Watson revises a segment by resending it under the same index, so the latest
/// result for an index replaces the earlier one.
#[derive(Debug, Clone, Default)]
pub struct ResultsAccumulator {
    results: Vec<TranscriptionResult>,
    speaker_labels: Vec<SpeakerLabel>,
}

impl ResultsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_result(&mut self, result: TranscriptionResult) {
        match self
            .results
            .iter_mut()
            .find(|r| r.result_index == result.result_index)
        {
            Some(existing) => *existing = result,
            None => {
                self.results.push(result);
                self.results.sort_by_key(|r| r.result_index);
            }
        }
    }

    pub fn add_speaker_labels(&mut self, labels: impl IntoIterator<Item = SpeakerLabel>) {
        self.speaker_labels.extend(labels);
    }

    pub fn results(&self) -> &[TranscriptionResult] {
        &self.results
    }

    pub fn speaker_labels(&self) -> &[SpeakerLabel] {
        &self.speaker_labels
    }

    /// Only results the service will not revise.
    pub fn final_results(&self) -> impl Iterator<Item = &TranscriptionResult> {
        self.results.iter().filter(|r| r.is_final)
    }

    /// Best alternatives of all results, joined by single spaces.
    pub fn best_transcript(&self) -> String {
        self.results
            .iter()
            .map(|r| r.transcript().trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
