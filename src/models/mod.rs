use serde::{Deserialize, Serialize};
use std::fmt;

/// Every published day heading starts with this phrase.
pub const DAY_LABEL_PREFIX: &str = "Vertretungen am";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("invalid day label {0:?}: must start with \"Vertretungen am\"")]
    InvalidDayLabel(String),
}

// ── Substitution ──────────────────────────────────────────────────────────────

/// One row of a day table: a single period's teacher/room replacement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    #[serde(default)]
    pub substitute: String,
    #[serde(default)]
    pub teacher: String,
    #[serde(default)]
    pub hours: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub subject_old: String,
    #[serde(default)]
    pub room: String,
    #[serde(default)]
    pub room_old: String,
    #[serde(default)]
    pub notice: String,
}

impl Substitution {
    /// Entry carrying only a free-text notice (days without regular rows).
    pub fn notice_only(notice: impl Into<String>) -> Self {
        Self {
            notice: notice.into(),
            ..Default::default()
        }
    }
}

// ── SubstitutionDay ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSubstitutionDay")]
pub struct SubstitutionDay {
    date: String,
    substitutions: Vec<Substitution>,
}

#[derive(Deserialize)]
struct RawSubstitutionDay {
    date: String,
    #[serde(default)]
    substitutions: Vec<Substitution>,
}

impl TryFrom<RawSubstitutionDay> for SubstitutionDay {
    type Error = ModelError;

    fn try_from(raw: RawSubstitutionDay) -> Result<Self, Self::Error> {
        SubstitutionDay::new(raw.date, raw.substitutions)
    }
}

impl SubstitutionDay {
    pub fn new(
        date: impl Into<String>,
        substitutions: Vec<Substitution>,
    ) -> Result<Self, ModelError> {
        let date = date.into();
        if !date.starts_with(DAY_LABEL_PREFIX) {
            return Err(ModelError::InvalidDayLabel(date));
        }
        Ok(Self {
            date,
            substitutions,
        })
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn substitutions(&self) -> &[Substitution] {
        &self.substitutions
    }

    pub fn is_empty(&self) -> bool {
        self.substitutions.is_empty()
    }
}

impl fmt::Display for SubstitutionDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.date)?;
        if self.is_empty() {
            return writeln!(f, "  (no entries)");
        }
        for s in &self.substitutions {
            if s.hours.is_empty() && s.class_name.is_empty() && s.substitute.is_empty() {
                writeln!(f, "  {}", s.notice)?;
                continue;
            }
            writeln!(
                f,
                "  {:<8} {:<8} {} for {} | {} (was {}) | room {} (was {}) | {}",
                s.hours,
                s.class_name,
                s.substitute,
                s.teacher,
                s.subject,
                s.subject_old,
                s.room,
                s.room_old,
                s.notice,
            )?;
        }
        Ok(())
    }
}
