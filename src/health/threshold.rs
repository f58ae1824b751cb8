// Edge-triggered threshold alarm: one alert per crossing, re-armed when the value drops back.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crossing {
    /// Went above the threshold on this observation.
    Raised,
    /// Still above; already reported.
    Sustained,
    /// Came back to or below the threshold.
    Cleared,
    Normal,
}

#[derive(Debug, Clone)]
pub struct ThresholdAlarm {
    threshold: f64,
    tripped: bool,
}

impl ThresholdAlarm {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            tripped: false,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn observe(&mut self, value: f64) -> Crossing {
        let above = value > self.threshold;
        match (self.tripped, above) {
            (false, true) => {
                self.tripped = true;
                Crossing::Raised
            }
            (true, true) => Crossing::Sustained,
            (true, false) => {
                self.tripped = false;
                Crossing::Cleared
            }
            (false, false) => Crossing::Normal,
        }
    }
}
