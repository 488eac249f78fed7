use std::collections::BTreeMap;

use tracing::info;

use crate::error::UnknownMode;

/// Armado `paymentType` codes for the free-text modes operators use.
const DEFAULT_MODES: [(&str, i32); 17] = [
    ("virement", 2),
    ("cb", 3),
    ("carte", 3),
    ("carte bancaire", 3),
    ("cheque", 1),
    ("chèque", 1),
    ("especes", 4),
    ("espèces", 4),
    ("liquide", 4),
    ("cash", 4),
    ("prelevement", 5),
    ("prélèvement", 5),
    ("sepa", 5),
    ("paypal", 6),
    ("stripe", 7),
    ("autre", 8),
    ("other", 8),
];

/// Owned mode table, built once from configuration and handed to the billing dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentModeMap {
    modes: BTreeMap<String, i32>,
}

impl Default for PaymentModeMap {
    fn default() -> Self {
        Self {
            modes: DEFAULT_MODES
                .iter()
                .map(|(mode, code)| (mode.to_string(), *code))
                .collect(),
        }
    }
}

impl PaymentModeMap {
    pub fn empty() -> Self {
        Self {
            modes: BTreeMap::new(),
        }
    }

    /// Add or overwrite a mapping. Labels are stored lowercase.
    pub fn register(&mut self, mode: &str, code: i32) {
        let key = normalize(mode);
        if self.modes.insert(key.clone(), code) != Some(code) {
            info!(mode = %key, code, "payment mode registered");
        }
    }

    /// Default table plus operator-configured pairs, which win on conflict.
    pub fn with_extra(extra: &[(String, i32)]) -> Self {
        let mut modes = Self::default();
        for (mode, code) in extra {
            modes.register(mode, *code);
        }
        modes
    }

    #[must_use]
    pub fn with_mode(mut self, mode: &str, code: i32) -> Self {
        self.register(mode, code);
        self
    }

    pub fn resolve(&self, mode: &str) -> Result<i32, UnknownMode> {
        self.modes
            .get(&normalize(mode))
            .copied()
            .ok_or_else(|| UnknownMode {
                mode: mode.to_string(),
                known: self.known_modes(),
            })
    }

    pub fn known_modes(&self) -> Vec<String> {
        self.modes.keys().cloned().collect()
    }
}

fn normalize(mode: &str) -> String {
    mode.trim().to_lowercase()
}
