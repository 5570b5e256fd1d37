use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single set of observations taken by a nurse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vitals {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub recorded_by: Uuid,
    pub temperature_c: Option<f64>,
    pub systolic: Option<i64>, // mmHg
    pub diastolic: Option<i64>,
    pub pulse_bpm: Option<i64>,
    pub respiratory_rate: Option<i64>,
    pub oxygen_saturation: Option<i64>, // %
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub notes: Option<String>,
    pub recorded_at: NaiveDateTime,
}

impl Vitals {
    /// Body mass index, when both weight and height were taken.
    pub fn bmi(&self) -> Option<f64> {
        match (self.weight_kg, self.height_cm) {
            (Some(w), Some(h)) if h > 0.0 => {
                let m = h / 100.0;
                Some((w / (m * m) * 10.0).round() / 10.0)
            }
            _ => None,
        }
    }

    pub fn blood_pressure(&self) -> Option<String> {
        match (self.systolic, self.diastolic) {
            (Some(s), Some(d)) => Some(format!("{s}/{d}")),
            _ => None,
        }
    }
}

/// Vitals row joined with the recording nurse's name.
#[derive(Debug, Clone, Serialize)]
pub struct VitalsView {
    pub vitals: Vitals,
    pub recorded_by_name: String,
}

/// Measurements submitted from the nurse form. Blank inputs arrive as `None`.
#[derive(Debug, Clone, Default)]
pub struct NewVitals {
    pub temperature_c: Option<f64>,
    pub systolic: Option<i64>,
    pub diastolic: Option<i64>,
    pub pulse_bpm: Option<i64>,
    pub respiratory_rate: Option<i64>,
    pub oxygen_saturation: Option<i64>,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub notes: Option<String>,
}

impl NewVitals {
    pub fn is_empty(&self) -> bool {
        self.temperature_c.is_none()
            && self.systolic.is_none()
            && self.diastolic.is_none()
            && self.pulse_bpm.is_none()
            && self.respiratory_rate.is_none()
            && self.oxygen_saturation.is_none()
            && self.weight_kg.is_none()
            && self.height_cm.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vitals {
        Vitals {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            recorded_by: Uuid::new_v4(),
            temperature_c: Some(36.8),
            systolic: Some(120),
            diastolic: Some(80),
            pulse_bpm: Some(72),
            respiratory_rate: None,
            oxygen_saturation: None,
            weight_kg: Some(70.0),
            height_cm: Some(175.0),
            notes: None,
            recorded_at: chrono::NaiveDateTime::default(),
        }
    }

    #[test]
    fn bmi_rounds_to_one_decimal() {
        assert_eq!(sample().bmi(), Some(22.9));
    }

    #[test]
    fn bmi_missing_height() {
        let mut v = sample();
        v.height_cm = None;
        assert_eq!(v.bmi(), None);
    }

    #[test]
    fn blood_pressure_formats_pair() {
        assert_eq!(sample().blood_pressure().as_deref(), Some("120/80"));
    }

    #[test]
    fn new_vitals_empty_detection() {
        assert!(NewVitals::default().is_empty());
        let v = NewVitals {
            pulse_bpm: Some(60),
            ..Default::default()
        };
        assert!(!v.is_empty());
    }
}
