//! Practitioner domain types.
//!
//! Practitioners are owned by the practitioner service; the prescription
//! side only ever sees them through the validation round-trip. The types
//! live in core because both services speak them on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a practitioner.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PractitionerId(String);

impl PractitionerId {
    /// Create a `PractitionerId` from a business identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PractitionerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload for registering a new practitioner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreatePractitioner {
    /// Business identifier for the new practitioner.
    pub id: PractitionerId,
    /// Medical license number; unique across practitioners.
    pub license_number: String,
    /// Institution the practitioner is attached to.
    pub institution: String,
    /// Office location, if known.
    pub office_location: Option<String>,
}

/// Partial update of a practitioner's fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdatePractitioner {
    /// Replacement license number, if provided.
    pub license_number: Option<String>,
    /// Replacement institution, if provided.
    pub institution: Option<String>,
    /// Replacement office location, if provided.
    pub office_location: Option<String>,
}

/// A practitioner record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Practitioner {
    /// Business identifier.
    pub id: PractitionerId,
    /// Medical license number; unique across practitioners.
    pub license_number: String,
    /// Institution the practitioner is attached to.
    pub institution: String,
    /// Office location, if known.
    pub office_location: Option<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Practitioner {
    /// Create a new practitioner record from a registration payload.
    #[must_use]
    pub fn from_create(create: CreatePractitioner, now: DateTime<Utc>) -> Self {
        Self {
            id: create.id,
            license_number: create.license_number,
            institution: create.institution,
            office_location: create.office_location,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update.
    pub fn apply_update(&mut self, update: UpdatePractitioner, now: DateTime<Utc>) {
        if let Some(license_number) = update.license_number {
            self.license_number = license_number;
        }
        if let Some(institution) = update.institution {
            self.institution = institution;
        }
        if let Some(office_location) = update.office_location {
            self.office_location = Some(office_location);
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_only_touches_provided_fields() {
        let now = Utc::now();
        let mut p = Practitioner::from_create(
            CreatePractitioner {
                id: PractitionerId::new("DOC1"),
                license_number: "LIC-100".to_string(),
                institution: "General Hospital".to_string(),
                office_location: None,
            },
            now,
        );

        p.apply_update(
            UpdatePractitioner {
                institution: Some("City Clinic".to_string()),
                ..UpdatePractitioner::default()
            },
            now,
        );

        assert_eq!(p.license_number, "LIC-100");
        assert_eq!(p.institution, "City Clinic");
        assert_eq!(p.office_location, None);
    }
}
