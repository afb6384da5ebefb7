// Quality switches queued against play positions.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shift {
    Up,
    Down,
}

#[derive(Debug, Default)]
pub struct SwitchSchedule {
    /// Sorted by position, latest first, so due entries pop off the end.
    pending: Vec<(f64, Shift)>,
}

impl SwitchSchedule {
    pub fn new(upgrade_at: &[f64], downgrade_at: &[f64]) -> Self {
        let mut pending: Vec<(f64, Shift)> = upgrade_at
            .iter()
            .map(|&at| (at, Shift::Up))
            .chain(downgrade_at.iter().map(|&at| (at, Shift::Down)))
            .filter(|(at, _)| at.is_finite())
            .collect();
        pending.sort_by(|a, b| b.0.total_cmp(&a.0));
        Self { pending }
    }

    /// Remove and return every switch scheduled at or before `position`, earliest first.
    pub fn due(&mut self, position: f64) -> Vec<Shift> {
        let mut due = Vec::new();
        while let Some(&(at, shift)) = self.pending.last() {
            if at > position {
                break;
            }
            self.pending.pop();
            due.push(shift);
        }
        due
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
