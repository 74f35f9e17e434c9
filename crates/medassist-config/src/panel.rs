//! Assistant panel defaults

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    /// Whether the panel starts expanded
    pub open: bool,
    pub width: u16,
    pub min_width: u16,
    pub max_width: u16,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            open: true,
            width: 420,
            min_width: 320,
            max_width: 960,
        }
    }
}
