use serde::{Deserialize, Serialize};

use super::ModelError;

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// Parsing is case-insensitive and trims surrounding whitespace; the
/// canonical form is always the lowercase literal.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let normalized = s.trim().to_ascii_lowercase();
                match normalized.as_str() {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(ModelError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(Severity {
    Critical => "critical",
    High => "high",
    Moderate => "moderate",
    Low => "low",
    Routine => "routine",
});

str_enum!(OrderCategory {
    Medications => "medications",
    Procedures => "procedures",
    Labs => "labs",
    Imaging => "imaging",
});

impl Severity {
    /// Every level, most urgent first.
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Moderate,
        Severity::Low,
        Severity::Routine,
    ];

    /// Urgency rank: higher is more urgent. ROUTINE is 0.
    pub fn urgency(&self) -> u8 {
        match self {
            Self::Critical => 4,
            Self::High => 3,
            Self::Moderate => 2,
            Self::Low => 1,
            Self::Routine => 0,
        }
    }

    /// CRITICAL and HIGH demand urgent human review.
    pub fn is_urgent(&self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }

    /// Uppercase label used in prompts and human-facing summaries.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Moderate => "MODERATE",
            Self::Low => "LOW",
            Self::Routine => "ROUTINE",
        }
    }
}

/// Total order by urgency: `Critical > High > Moderate > Low > Routine`.
impl Ord for Severity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.urgency().cmp(&other.urgency())
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl OrderCategory {
    pub const ALL: [OrderCategory; 4] = [
        OrderCategory::Medications,
        OrderCategory::Procedures,
        OrderCategory::Labs,
        OrderCategory::Imaging,
    ];

    /// Heading used when orders are rendered into the reasoning request.
    pub fn heading(&self) -> &'static str {
        match self {
            Self::Medications => "Medications",
            Self::Procedures => "Procedures",
            Self::Labs => "Laboratory Tests",
            Self::Imaging => "Imaging",
        }
    }
}
