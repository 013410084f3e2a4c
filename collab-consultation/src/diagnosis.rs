//! Five-field structured diagnosis and its text codec.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ConsultationError;
use crate::sections;

/// The fixed set of fields a diagnosis record may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisField {
    Symptoms,
    AuxiliaryExams,
    DiagnosisResult,
    DiagnosisBasis,
    TreatmentPlan,
}

impl DiagnosisField {
    pub const ALL: [DiagnosisField; 5] = [
        DiagnosisField::Symptoms,
        DiagnosisField::AuxiliaryExams,
        DiagnosisField::DiagnosisResult,
        DiagnosisField::DiagnosisBasis,
        DiagnosisField::TreatmentPlan,
    ];

    /// Fields a doctor's opinion consists of; findings are shared separately.
    pub const OPINION: [DiagnosisField; 3] = [
        DiagnosisField::DiagnosisResult,
        DiagnosisField::DiagnosisBasis,
        DiagnosisField::TreatmentPlan,
    ];

    pub const FINDINGS: [DiagnosisField; 2] =
        [DiagnosisField::Symptoms, DiagnosisField::AuxiliaryExams];

    /// Section name used inside generated text.
    pub fn section_name(self) -> &'static str {
        match self {
            DiagnosisField::Symptoms => "Symptoms",
            DiagnosisField::AuxiliaryExams => "Auxiliary Examinations",
            DiagnosisField::DiagnosisResult => "Diagnosis Result",
            DiagnosisField::DiagnosisBasis => "Diagnosis Basis",
            DiagnosisField::TreatmentPlan => "Treatment Plan",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            DiagnosisField::Symptoms => "symptoms",
            DiagnosisField::AuxiliaryExams => "auxiliary_exams",
            DiagnosisField::DiagnosisResult => "diagnosis_result",
            DiagnosisField::DiagnosisBasis => "diagnosis_basis",
            DiagnosisField::TreatmentPlan => "treatment_plan",
        }
    }
}

impl fmt::Display for DiagnosisField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for DiagnosisField {
    type Err = ConsultationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiagnosisField::ALL
            .into_iter()
            .find(|field| field.key() == s || field.section_name() == s)
            .ok_or_else(|| ConsultationError::UnknownField(s.to_string()))
    }
}

/// What a lookup asks for: one field, or the whole record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSelector {
    All,
    Field(DiagnosisField),
}

impl FromStr for FieldSelector {
    type Err = ConsultationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "ALL" {
            return Ok(FieldSelector::All);
        }
        s.parse().map(FieldSelector::Field)
    }
}

/// Answer to a [`FieldSelector`] lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosisLookup {
    Record(StructuredDiagnosis),
    Field(Option<String>),
}

/// One doctor's current opinion about one patient.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuredDiagnosis {
    fields: BTreeMap<DiagnosisField, String>,
}

impl StructuredDiagnosis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture every recognized section present in `text`.
    ///
    /// Missing sections are simply absent; text outside recognized sections is
    /// ignored.
    pub fn parse(text: &str) -> Self {
        let fields = DiagnosisField::ALL
            .into_iter()
            .filter_map(|field| sections::extract(text, field.section_name()).map(|v| (field, v)))
            .collect();
        Self { fields }
    }

    pub fn get(&self, field: DiagnosisField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    pub fn lookup(&self, selector: FieldSelector) -> DiagnosisLookup {
        match selector {
            FieldSelector::All => DiagnosisLookup::Record(self.clone()),
            FieldSelector::Field(field) => DiagnosisLookup::Field(self.get(field).map(str::to_string)),
        }
    }

    pub fn set(&mut self, field: DiagnosisField, value: impl Into<String>) {
        self.fields.insert(field, value.into());
    }

    pub fn with(mut self, field: DiagnosisField, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    /// Overlay `update` onto this record.
    ///
    /// Fields present in `update` with a non-blank value replace or add; fields
    /// absent from `update`, or blank in it, keep their current value.
    pub fn merge(&mut self, update: &StructuredDiagnosis) {
        for (field, value) in &update.fields {
            if !value.trim().is_empty() {
                self.fields.insert(*field, value.clone());
            }
        }
    }

    /// Copy of this record limited to `fields`.
    pub fn project(&self, fields: &[DiagnosisField]) -> StructuredDiagnosis {
        let fields = self
            .fields
            .iter()
            .filter(|(field, _)| fields.contains(field))
            .map(|(field, value)| (*field, value.clone()))
            .collect();
        StructuredDiagnosis { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Render the present fields in canonical section format.
    pub fn render(&self) -> String {
        self.fields
            .iter()
            .map(|(field, value)| sections::render(field.section_name(), value))
            .collect()
    }

    /// Render `fields` in order, showing `none` for absent ones. Used in prompts,
    /// where the model should see that a field is still empty.
    pub fn render_fields(&self, fields: &[DiagnosisField]) -> String {
        fields
            .iter()
            .map(|field| sections::render(field.section_name(), self.get(*field).unwrap_or("none")))
            .collect()
    }

    /// Result, basis and plan only.
    pub fn render_opinion(&self) -> String {
        self.render_fields(&DiagnosisField::OPINION)
    }
}

/// The output format every revision prompt asks for.
pub fn opinion_format() -> String {
    DiagnosisField::OPINION
        .iter()
        .map(|field| sections::render(field.section_name(), "(1) xxx\n(2) xxx"))
        .collect()
}
