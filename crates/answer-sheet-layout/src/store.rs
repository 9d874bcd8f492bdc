//! Persistence seam for templates, keyed 1:1 by exam id.

use crate::exam::ExamSpec;
use crate::generate::{generate_template, LayoutOptions};
use crate::profile::GeometryProfile;
use crate::template::{CalibrationRecord, Template};
use log::{debug, info};
use std::collections::HashMap;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateStoreError {
    #[error("no template for exam '{exam_id}'")]
    NotFound { exam_id: String },
    #[error("a template for exam '{exam_id}' already exists")]
    AlreadyExists { exam_id: String },
    #[error("template for exam '{exam_id}' is sealed; its layout can no longer change")]
    Sealed { exam_id: String },
}

/// Storage for one template per exam.
///
/// Layouts are created once and replaced only while unsealed; calibration
/// updates are always accepted and touch nothing but the coordinate system.
pub trait TemplateStore {
    fn get(&self, exam_id: &str) -> Result<Template, TemplateStoreError>;

    fn create(&mut self, exam_id: &str, template: Template) -> Result<(), TemplateStoreError>;

    fn replace_layout(&mut self, exam_id: &str, template: Template)
        -> Result<(), TemplateStoreError>;

    fn update_calibration(
        &mut self,
        exam_id: &str,
        calibration: CalibrationRecord,
    ) -> Result<(), TemplateStoreError>;
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryTemplateStore {
    templates: HashMap<String, Template>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    fn slot(&mut self, exam_id: &str) -> Result<&mut Template, TemplateStoreError> {
        self.templates
            .get_mut(exam_id)
            .ok_or_else(|| TemplateStoreError::NotFound {
                exam_id: exam_id.to_string(),
            })
    }
}

impl TemplateStore for InMemoryTemplateStore {
    fn get(&self, exam_id: &str) -> Result<Template, TemplateStoreError> {
        self.templates
            .get(exam_id)
            .cloned()
            .ok_or_else(|| TemplateStoreError::NotFound {
                exam_id: exam_id.to_string(),
            })
    }

    fn create(&mut self, exam_id: &str, template: Template) -> Result<(), TemplateStoreError> {
        if self.templates.contains_key(exam_id) {
            return Err(TemplateStoreError::AlreadyExists {
                exam_id: exam_id.to_string(),
            });
        }
        self.templates.insert(exam_id.to_string(), template);
        Ok(())
    }

    fn replace_layout(
        &mut self,
        exam_id: &str,
        template: Template,
    ) -> Result<(), TemplateStoreError> {
        let current = self.slot(exam_id)?;
        if current.sealed {
            return Err(TemplateStoreError::Sealed {
                exam_id: exam_id.to_string(),
            });
        }
        *current = template;
        Ok(())
    }

    fn update_calibration(
        &mut self,
        exam_id: &str,
        calibration: CalibrationRecord,
    ) -> Result<(), TemplateStoreError> {
        self.slot(exam_id)?.coordinate_system.calibration = Some(calibration);
        Ok(())
    }
}

/// Return the exam's template, generating or regenerating it as needed.
///
/// - missing: generate and store
/// - same spec fingerprint: keep the stored one
/// - spec changed and unsealed: regenerate in place
/// - spec changed and sealed: [`TemplateStoreError::Sealed`]
pub fn ensure_template<S: TemplateStore + ?Sized>(
    store: &mut S,
    exam_id: &str,
    spec: &ExamSpec,
    profile: &GeometryProfile,
    options: &LayoutOptions,
) -> Result<Template, TemplateStoreError> {
    match store.get(exam_id) {
        Ok(existing) if existing.spec_fingerprint == spec.fingerprint() => Ok(existing),
        Ok(existing) if existing.sealed => Err(TemplateStoreError::Sealed {
            exam_id: exam_id.to_string(),
        }),
        Ok(_) => {
            info!("exam '{exam_id}' changed; regenerating its template");
            let template = generate_template(spec, profile, options);
            store.replace_layout(exam_id, template.clone())?;
            Ok(template)
        }
        Err(TemplateStoreError::NotFound { .. }) => {
            debug!("creating template for exam '{exam_id}'");
            let template = generate_template(spec, profile, options);
            store.create(exam_id, template.clone())?;
            Ok(template)
        }
        Err(e) => Err(e),
    }
}
