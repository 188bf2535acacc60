use sage_backend::Flashcard;

/// Judgment passed on one revealed card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewGrade {
    /// Counts toward the score and retires the card.
    Got,
    /// Counts against the score and queues the card for another pass.
    Retry,
}

/// Where a review session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewPhase {
    Reviewing,
    Complete,
}

/// Tally of grades handed out so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewReport {
    pub got: u32,
    pub retried: u32,
}

impl ReviewReport {
    /// Total grades handed out, retries included.
    pub fn total(&self) -> u32 {
        self.got + self.retried
    }

    /// Share of grades that were `Got`, as a rounded percentage.
    ///
    /// `None` before any card has been graded.
    pub fn score_percent(&self) -> Option<i64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        Some((f64::from(self.got) * 100.0 / f64::from(total)).round() as i64)
    }
}

/// Review queue over one generated deck.
///
/// Cards graded `Retry` come back as a fresh pass once the current deck is
/// exhausted; the session completes when a pass ends with nothing queued.
/// A retry on the final card of a pass still requeues it.
#[derive(Debug, Clone)]
pub struct ReviewSession {
    deck: Vec<Flashcard>,
    position: usize,
    retry_queue: Vec<usize>,
    got: u32,
    retried: u32,
    phase: ReviewPhase,
}

impl ReviewSession {
    /// Starts a session over `deck`. Returns `None` for an empty deck.
    pub fn new(deck: Vec<Flashcard>) -> Option<Self> {
        if deck.is_empty() {
            return None;
        }
        Some(Self {
            deck,
            position: 0,
            retry_queue: Vec::new(),
            got: 0,
            retried: 0,
            phase: ReviewPhase::Reviewing,
        })
    }

    pub fn phase(&self) -> ReviewPhase {
        self.phase
    }

    pub fn is_complete(&self) -> bool {
        self.phase == ReviewPhase::Complete
    }

    /// The card under review, `None` once the session has completed.
    pub fn current(&self) -> Option<&Flashcard> {
        match self.phase {
            ReviewPhase::Reviewing => self.deck.get(self.position),
            ReviewPhase::Complete => None,
        }
    }

    /// One-based position of the current card within the current pass.
    pub fn card_number(&self) -> usize {
        self.position + 1
    }

    /// Number of cards in the current pass.
    pub fn deck_len(&self) -> usize {
        self.deck.len()
    }

    pub fn got(&self) -> u32 {
        self.got
    }

    pub fn retried(&self) -> u32 {
        self.retried
    }

    /// Grades the current card and advances. Ignored once complete.
    pub fn grade(&mut self, grade: ReviewGrade) {
        if self.is_complete() {
            return;
        }
        match grade {
            ReviewGrade::Got => self.got += 1,
            ReviewGrade::Retry => {
                self.retry_queue.push(self.position);
                self.retried += 1;
            }
        }
        self.advance();
    }

    /// Share of the session worked through, against the current pass.
    ///
    /// Later passes shrink the deck, which can push the raw ratio past one;
    /// the value is capped at 100.
    pub fn progress_percent(&self) -> u32 {
        let graded = f64::from(self.got + self.retried);
        let span = self.deck.len() as f64 + f64::from(self.retried);
        let percent = (graded * 100.0 / span).round() as u32;
        percent.min(100)
    }

    /// Tally so far; final once [`Self::is_complete`] holds.
    pub fn report(&self) -> ReviewReport {
        ReviewReport {
            got: self.got,
            retried: self.retried,
        }
    }

    fn advance(&mut self) {
        let next = self.position + 1;
        if next < self.deck.len() {
            self.position = next;
            return;
        }
        if self.retry_queue.is_empty() {
            self.phase = ReviewPhase::Complete;
            return;
        }
        // The missed cards become the next pass, in the order they missed.
        let missed = std::mem::take(&mut self.retry_queue);
        self.deck = missed
            .into_iter()
            .map(|index| self.deck[index].clone())
            .collect();
        self.position = 0;
    }
}
