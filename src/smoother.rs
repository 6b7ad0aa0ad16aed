// Rolling window that smooths per-frame emotions into a stable one

use std::collections::VecDeque;

use crate::models::EmotionLabel;

/// Number of classifications kept in the window
pub const WINDOW_SIZE: usize = 5;

/// Bounded FIFO of the most recent classifications, oldest first
#[derive(Debug, Clone)]
pub struct EmotionWindow {
    labels: VecDeque<EmotionLabel>,
    stable: Option<EmotionLabel>,
}

impl EmotionWindow {
    pub fn new() -> Self {
        Self {
            labels: VecDeque::with_capacity(WINDOW_SIZE + 1),
            stable: None,
        }
    }

    /// Push a new classification, evicting the oldest once full, and return the
    /// recomputed stable emotion
    pub fn push(&mut self, label: EmotionLabel) -> EmotionLabel {
        self.labels.push_back(label);
        if self.labels.len() > WINDOW_SIZE {
            self.labels.pop_front();
        }

        let stable = mode(&self.labels).unwrap_or(label);
        self.stable = Some(stable);
        stable
    }

    /// Current stable emotion, `None` until the first push
    pub fn stable(&self) -> Option<EmotionLabel> {
        self.stable
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Labels in the window, oldest first
    pub fn iter(&self) -> impl Iterator<Item = EmotionLabel> + '_ {
        self.labels.iter().copied()
    }

    pub fn clear(&mut self) {
        self.labels.clear();
        self.stable = None;
    }
}

impl Default for EmotionWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Most frequent label; among equally frequent labels the one seen most recently wins.
fn mode(labels: &VecDeque<EmotionLabel>) -> Option<EmotionLabel> {
    let mut counts = [0usize; EmotionLabel::COUNT];
    let mut last_seen = [0usize; EmotionLabel::COUNT];
    for (position, label) in labels.iter().enumerate() {
        counts[label.index()] += 1;
        last_seen[label.index()] = position;
    }

    EmotionLabel::ALL
        .into_iter()
        .filter(|label| counts[label.index()] > 0)
        .max_by_key(|label| (counts[label.index()], last_seen[label.index()]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use EmotionLabel::*;

    fn push_all(window: &mut EmotionWindow, labels: &[EmotionLabel]) -> Vec<EmotionLabel> {
        labels.iter().map(|&label| window.push(label)).collect()
    }

    #[test]
    fn empty_window_has_no_stable_emotion() {
        let window = EmotionWindow::new();
        assert!(window.is_empty());
        assert_eq!(window.stable(), None);
    }

    #[test]
    fn single_push_is_stable() {
        let mut window = EmotionWindow::new();
        assert_eq!(window.push(Fear), Fear);
        assert_eq!(window.stable(), Some(Fear));
    }

    #[test]
    fn window_never_exceeds_capacity() {
        let mut window = EmotionWindow::new();
        for (i, label) in EmotionLabel::ALL.iter().cycle().take(23).enumerate() {
            window.push(*label);
            assert_eq!(window.len(), (i + 1).min(WINDOW_SIZE));
        }
    }

    #[test]
    fn sixth_push_evicts_the_oldest() {
        let mut window = EmotionWindow::new();
        push_all(&mut window, &[Angry, Happy, Happy, Sad, Neutral]);
        window.push(Fear);
        assert_eq!(window.iter().collect::<Vec<_>>(), vec![Happy, Happy, Sad, Neutral, Fear]);
    }

    #[test]
    fn ties_prefer_most_recently_seen() {
        let mut window = EmotionWindow::new();
        let stable = push_all(&mut window, &[Happy, Happy, Sad, Sad, Neutral]);
        assert_eq!(stable.last(), Some(&Sad));

        let mut window = EmotionWindow::new();
        let stable = push_all(&mut window, &[Sad, Happy]);
        assert_eq!(stable, vec![Sad, Happy]);
    }

    #[test]
    fn single_outlier_does_not_flip_the_mode() {
        let mut window = EmotionWindow::new();
        let stable = push_all(&mut window, &[Happy, Happy, Happy, Sad, Happy]);
        assert_eq!(stable, vec![Happy; 5]);
    }

    #[test]
    fn stable_matches_brute_force_mode_over_last_five() {
        let sequence = [
            Angry, Sad, Sad, Happy, Angry, Angry, Neutral, Surprise, Surprise, Neutral, Disgust,
            Happy, Happy, Fear, Fear, Fear, Sad, Neutral, Neutral, Sad,
        ];
        let mut window = EmotionWindow::new();
        for end in 1..=sequence.len() {
            let got = window.push(sequence[end - 1]);
            let recent = &sequence[end.saturating_sub(WINDOW_SIZE)..end];

            let best_count = recent
                .iter()
                .map(|l| recent.iter().filter(|m| *m == l).count())
                .max()
                .unwrap();
            let expected = *recent
                .iter()
                .rev()
                .find(|l| recent.iter().filter(|m| m == l).count() == best_count)
                .unwrap();
            assert_eq!(got, expected, "after {end} pushes of {sequence:?}");
        }
    }

    #[test]
    fn clear_resets_state() {
        let mut window = EmotionWindow::new();
        push_all(&mut window, &[Happy, Sad]);
        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.stable(), None);
    }
}
