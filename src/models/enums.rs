use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + label + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal : $label:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$(Self::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }

            /// Human-readable label for pages.
            pub fn label(&self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
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

        impl rusqlite::types::FromSql for $name {
            fn column_result(value: rusqlite::types::ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
                let s = value.as_str()?;
                s.parse()
                    .map_err(|e: DatabaseError| rusqlite::types::FromSqlError::Other(Box::new(e)))
            }
        }

        impl rusqlite::types::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
            }
        }
    };
}

str_enum!(StaffRole {
    Doctor => "doctor" : "Doctor",
    Nurse => "nurse" : "Nurse",
    LabScientist => "lab_scientist" : "Lab Scientist",
    RecordsKeeper => "records_keeper" : "Records Keeper",
    Admin => "admin" : "Administrator",
});

impl StaffRole {
    /// Landing page for this role after login.
    pub fn dashboard_path(&self) -> &'static str {
        match self {
            Self::Doctor => "/doctor",
            Self::Nurse => "/nurse",
            Self::LabScientist => "/lab",
            Self::RecordsKeeper => "/records",
            Self::Admin => "/admin",
        }
    }

    /// Where this role opens a patient from the search box.
    pub fn patient_link_prefix(&self) -> &'static str {
        match self {
            Self::Doctor => "/doctor/patients/",
            Self::Nurse => "/nurse/patients/",
            Self::LabScientist | Self::RecordsKeeper | Self::Admin => "/records/patients/",
        }
    }
}

str_enum!(Gender {
    Male => "male" : "Male",
    Female => "female" : "Female",
    Other => "other" : "Other",
});

str_enum!(AppointmentStatus {
    Scheduled => "scheduled" : "Scheduled",
    Confirmed => "confirmed" : "Confirmed",
    Completed => "completed" : "Completed",
    Cancelled => "cancelled" : "Cancelled",
});

impl AppointmentStatus {
    pub fn can_transition_to(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Scheduled, Self::Confirmed)
                | (Self::Confirmed, Self::Completed)
                | (Self::Scheduled, Self::Cancelled)
                | (Self::Confirmed, Self::Cancelled)
        )
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Confirmed)
    }

    pub fn badge_class(&self) -> &'static str {
        match self {
            Self::Scheduled => "bg-secondary",
            Self::Confirmed => "bg-primary",
            Self::Completed => "bg-success",
            Self::Cancelled => "bg-danger",
        }
    }
}

str_enum!(TestRequestStatus {
    Pending => "pending" : "Pending",
    SampleCollected => "sample_collected" : "Sample Collected",
    Completed => "completed" : "Completed",
    Cancelled => "cancelled" : "Cancelled",
});

impl TestRequestStatus {
    pub fn can_transition_to(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::SampleCollected)
                | (Self::SampleCollected, Self::Completed)
                | (Self::Pending, Self::Cancelled)
                | (Self::SampleCollected, Self::Cancelled)
        )
    }

    pub fn badge_class(&self) -> &'static str {
        match self {
            Self::Pending => "bg-warning text-dark",
            Self::SampleCollected => "bg-info text-dark",
            Self::Completed => "bg-success",
            Self::Cancelled => "bg-danger",
        }
    }
}

str_enum!(TestPriority {
    Routine => "routine" : "Routine",
    Urgent => "urgent" : "Urgent",
});

str_enum!(ResultFlag {
    Normal => "normal" : "Normal",
    Low => "low" : "Low",
    High => "high" : "High",
    Critical => "critical" : "Critical",
});

str_enum!(PrescriptionStatus {
    Active => "active" : "Active",
    Completed => "completed" : "Completed",
    Discontinued => "discontinued" : "Discontinued",
});

impl PrescriptionStatus {
    pub fn can_transition_to(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Completed) | (Self::Active, Self::Discontinued)
        )
    }
}

str_enum!(BloodRequestStatus {
    Pending => "pending" : "Pending",
    Approved => "approved" : "Approved",
    Issued => "issued" : "Issued",
    Rejected => "rejected" : "Rejected",
    Cancelled => "cancelled" : "Cancelled",
});

impl BloodRequestStatus {
    pub fn can_transition_to(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved)
                | (Self::Approved, Self::Issued)
                | (Self::Pending, Self::Rejected)
                | (Self::Pending, Self::Cancelled)
                | (Self::Approved, Self::Cancelled)
        )
    }

    pub fn badge_class(&self) -> &'static str {
        match self {
            Self::Pending => "bg-warning text-dark",
            Self::Approved => "bg-primary",
            Self::Issued => "bg-success",
            Self::Rejected | Self::Cancelled => "bg-danger",
        }
    }
}

str_enum!(BloodUrgency {
    Routine => "routine" : "Routine",
    Urgent => "urgent" : "Urgent",
    Emergency => "emergency" : "Emergency",
});

/// ABO/Rh groups accepted on patient records and blood requests.
pub const BLOOD_GROUPS: &[&str] = &["A+", "A-", "B+", "B-", "AB+", "AB-", "O+", "O-"];

/// Haemoglobin genotypes accepted on patient records.
pub const GENOTYPES: &[&str] = &["AA", "AS", "SS", "AC", "SC"];
