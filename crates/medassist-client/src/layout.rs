//! Panel layout state
//!
//! Updates return a new value; the controller swaps it in and announces the
//! change.

use medassist_config::PanelConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelLayout {
    pub open: bool,
    pub width: u16,
    pub min_width: u16,
    pub max_width: u16,
}

impl Default for PanelLayout {
    fn default() -> Self {
        Self::from_config(&PanelConfig::default())
    }
}

impl PanelLayout {
    pub fn from_config(config: &PanelConfig) -> Self {
        let min_width = config.min_width.min(config.max_width);
        let max_width = config.max_width.max(config.min_width);
        Self {
            open: config.open,
            width: config.width.clamp(min_width, max_width),
            min_width,
            max_width,
        }
    }

    pub fn opened(self) -> Self {
        Self { open: true, ..self }
    }

    pub fn closed(self) -> Self {
        Self { open: false, ..self }
    }

    pub fn toggled(self) -> Self {
        Self {
            open: !self.open,
            ..self
        }
    }

    /// Resize, clamped to the configured bounds
    pub fn with_width(self, width: u16) -> Self {
        Self {
            width: width.clamp(self.min_width, self.max_width),
            ..self
        }
    }
}
