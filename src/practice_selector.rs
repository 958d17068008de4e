use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;

use crate::config::ContentLocale;
use crate::models::{AnswerHistoryRecord, PracticeItem, PracticeOption, QuestionPoolEntry};

pub const DEFAULT_PRACTICE_LIMIT: usize = 5;

/// Previously missed questions never take more than this many slots.
pub const MAX_REPEATED_MISSES: usize = 3;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("topic has no questions")]
    EmptyPool,
}

/// Builds bounded practice sets: missed questions first, then unseen ones,
/// then questions already answered correctly.
#[derive(Debug, Clone, Copy)]
pub struct PracticeSelector {
    limit: usize,
    locale: ContentLocale,
}

impl Default for PracticeSelector {
    fn default() -> Self {
        Self::new(DEFAULT_PRACTICE_LIMIT, ContentLocale::Es)
    }
}

impl PracticeSelector {
    pub fn new(limit: usize, locale: ContentLocale) -> Self {
        Self { limit, locale }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn select(
        &self,
        pool: &[QuestionPoolEntry],
        history: &[AnswerHistoryRecord],
    ) -> Result<Vec<PracticeItem>, SelectionError> {
        self.select_with_rng(pool, history, self.limit, &mut rand::thread_rng())
    }

    pub fn select_with_rng<R: Rng + ?Sized>(
        &self,
        pool: &[QuestionPoolEntry],
        history: &[AnswerHistoryRecord],
        limit: usize,
        rng: &mut R,
    ) -> Result<Vec<PracticeItem>, SelectionError> {
        if pool.is_empty() {
            return Err(SelectionError::EmptyPool);
        }

        let missed: HashSet<&str> = history
            .iter()
            .filter(|record| !record.is_correct)
            .map(|record| record.question_id.as_str())
            .collect();
        let answered: HashSet<&str> = history.iter().map(|record| record.question_id.as_str()).collect();

        // A question missed at least once stays in the missed tier.
        let mut incorrect_tier: Vec<&QuestionPoolEntry> = Vec::new();
        let mut unseen_tier: Vec<&QuestionPoolEntry> = Vec::new();
        let mut correct_tier: Vec<&QuestionPoolEntry> = Vec::new();
        for entry in pool {
            let id = entry.id.as_str();
            if missed.contains(id) {
                incorrect_tier.push(entry);
            } else if answered.contains(id) {
                correct_tier.push(entry);
            } else {
                unseen_tier.push(entry);
            }
        }

        let mut selected: Vec<&QuestionPoolEntry> = Vec::with_capacity(limit);
        let tiers = [
            (incorrect_tier, MAX_REPEATED_MISSES.min(limit)),
            (unseen_tier, limit),
            (correct_tier, limit),
        ];
        for (mut tier, cap) in tiers {
            let open_slots = limit.saturating_sub(selected.len()).min(cap);
            if open_slots == 0 {
                continue;
            }
            tier.shuffle(rng);
            selected.extend(tier.into_iter().take(open_slots));
        }

        selected.shuffle(rng);
        selected.truncate(limit);

        Ok(selected.into_iter().map(|entry| self.to_practice_item(entry)).collect())
    }

    fn to_practice_item(&self, entry: &QuestionPoolEntry) -> PracticeItem {
        let correct = entry.options.iter().find(|option| option.is_correct);
        let rationale = correct
            .and_then(|option| option.rationale.as_deref())
            .map(str::trim)
            .filter(|rationale| !rationale.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_rationale(self.locale).to_string());

        PracticeItem {
            id: entry.id.clone(),
            text: entry.text.clone(),
            options: entry
                .options
                .iter()
                .map(|option| PracticeOption {
                    id: option.id.clone(),
                    text: option.text.clone(),
                })
                .collect(),
            correct_option_id: correct.map(|option| option.id.clone()).unwrap_or_default(),
            rationale,
        }
    }
}

fn default_rationale(locale: ContentLocale) -> &'static str {
    match locale {
        ContentLocale::Es => "¡Esta es la respuesta correcta!",
        ContentLocale::En => "This is the correct answer!",
    }
}
